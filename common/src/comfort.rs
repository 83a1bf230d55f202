use crate::types::{
    DecisionOutput, DeviceProfile, FanLevel, OperationMode, SensorSnapshot, WeatherInfo,
};

/// Base comfort temperature the rules adjust from.
pub const BASE_TARGET_C: f64 = 26.0;
pub const MIN_TARGET_C: i32 = 16;
pub const MAX_TARGET_C: i32 = 30;

/// Derive target settings from room conditions, the unit profile, and the
/// learned user offset. Pure and deterministic; rules run in a fixed order
/// and each firing rule appends one rationale entry.
pub fn decide(
    snapshot: SensorSnapshot,
    profile: &DeviceProfile,
    weather: Option<WeatherInfo>,
    learned_offset: f64,
) -> DecisionOutput {
    let mut target = BASE_TARGET_C;
    let mut fan_level = FanLevel::Auto;
    let mut mode = OperationMode::Cool;
    let mut rationale = Vec::new();

    // Learned user preference.
    if learned_offset != 0.0 {
        target += learned_offset;
        rationale.push(format!(
            "learned user preference: {}{}\u{b0}C",
            if learned_offset > 0.0 { "+" } else { "" },
            learned_offset
        ));
    }

    // Perceived heat: humid air feels warmer, dry air cooler. The two bands
    // are mutually exclusive.
    let humidity = snapshot.humidity_pct;
    if humidity > 70.0 {
        target -= 1.0;
        rationale.push(format!(
            "high humidity ({humidity}%): decrease temp by 1\u{b0}C"
        ));
        if humidity > 80.0 {
            mode = OperationMode::Dry;
            rationale.push("humidity above 80%: switch to dry mode".to_string());
        }
    } else if humidity < 40.0 {
        target += 1.0;
        rationale.push(format!(
            "low humidity ({humidity}%): increase temp by 1\u{b0}C"
        ));
    }

    // Airflow scaled to floor area.
    let area = profile.room_area_m2;
    if area > 30.0 {
        fan_level = FanLevel::High;
        rationale.push(format!("large room ({area}m\u{b2}): fan high"));
    } else if area < 15.0 {
        fan_level = FanLevel::Low;
        rationale.push(format!("small room ({area}m\u{b2}): fan low"));
    }

    // Under extreme outdoor heat a very low setpoint wastes energy.
    if let Some(weather) = weather {
        if weather.outdoor_temp_c > 35.0 && target < 25.0 {
            target = 25.0;
            rationale.push(format!(
                "outdoor very hot ({}\u{b0}C): limit minimum to 25\u{b0}C",
                weather.outdoor_temp_c
            ));
        }
    }

    // Non-inverter compressors cycle hard below 25.
    if profile.ac_type == crate::types::AcType::NonInverter && target < 25.0 {
        target = 25.0;
        rationale.push("non-inverter unit: limit minimum to 25\u{b0}C".to_string());
    }

    DecisionOutput {
        target_temp: (target.round() as i32).clamp(MIN_TARGET_C, MAX_TARGET_C),
        fan_level,
        mode,
        rationale,
    }
}
