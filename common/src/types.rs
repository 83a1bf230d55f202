use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Cool,
    Dry,
    Auto,
    Fan,
}

impl OperationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cool => "cool",
            Self::Dry => "dry",
            Self::Auto => "auto",
            Self::Fan => "fan",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "cool" => Some(Self::Cool),
            "dry" => Some(Self::Dry),
            "auto" => Some(Self::Auto),
            "fan" => Some(Self::Fan),
            _ => None,
        }
    }

    /// Numeric encoding used on reported-state telemetry.
    pub fn wire_level(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Cool => 1,
            Self::Dry => 2,
            Self::Fan => 3,
        }
    }

    pub fn from_wire_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Auto),
            1 => Some(Self::Cool),
            2 => Some(Self::Dry),
            3 => Some(Self::Fan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanLevel {
    Auto,
    Low,
    Medium,
    High,
}

impl FanLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Numeric encoding used on the device command channel.
    pub fn wire_level(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    pub fn from_wire_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Auto),
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Manual,
    Automatic,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "automatic" => Some(Self::Automatic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcType {
    #[serde(rename = "inverter")]
    Inverter,
    #[serde(rename = "non-inverter")]
    NonInverter,
}

impl AcType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inverter => "inverter",
            Self::NonInverter => "non-inverter",
        }
    }
}

/// Static attributes of an installed unit; immutable during a decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub room_area_m2: f64,
    pub ac_type: AcType,
    pub rated_power_w: f64,
    pub capacity_btu: u32,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            room_area_m2: 20.0,
            ac_type: AcType::Inverter,
            rated_power_w: 1000.0,
            capacity_btu: 9000,
        }
    }
}

pub const FALLBACK_TEMPERATURE_C: f64 = 28.0;
pub const FALLBACK_HUMIDITY_PCT: f64 = 60.0;

/// Most recent known room readings. When a device has no mapped sensor, or no
/// telemetry has arrived yet, the fallback defaults stand in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSnapshot {
    #[serde(rename = "currentTemp")]
    pub temperature_c: f64,
    #[serde(rename = "humidity")]
    pub humidity_pct: f64,
}

impl SensorSnapshot {
    pub fn new(temperature_c: f64, humidity_pct: f64) -> Self {
        Self {
            temperature_c,
            humidity_pct,
        }
    }

    pub fn fallback() -> Self {
        Self {
            temperature_c: FALLBACK_TEMPERATURE_C,
            humidity_pct: FALLBACK_HUMIDITY_PCT,
        }
    }
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self::fallback()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherInfo {
    pub outdoor_temp_c: f64,
}

/// Target settings produced by the comfort rules, with one rationale entry
/// per rule that fired, in application order. An empty rationale means
/// standard operation with no adjustment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionOutput {
    #[serde(rename = "targetTemp")]
    pub target_temp: i32,
    #[serde(rename = "fanLevel")]
    pub fan_level: FanLevel,
    pub mode: OperationMode,
    pub rationale: Vec<String>,
}

impl DecisionOutput {
    pub fn rationale_text(&self) -> String {
        self.rationale.join(". ")
    }

    pub fn is_standard(&self) -> bool {
        self.rationale.is_empty()
    }
}

/// One point from a cumulative energy counter (kWh). The counter never
/// legitimately decreases, but device resets do happen; deltas are clamped
/// downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyReading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Device state as last reported (or optimistically assumed) by the host,
/// compared against a fresh decision to tell whether anything must be sent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DeviceState {
    #[serde(rename = "isOn")]
    pub power_on: bool,
    #[serde(rename = "targetTemp")]
    pub target_temp: Option<i32>,
    pub mode: Option<OperationMode>,
    #[serde(rename = "fanLevel")]
    pub fan_level: Option<FanLevel>,
}

/// A single command on the device channel. Dispatch is fire-and-forget: the
/// channel reports submission success only, never delivery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    SetTarget(i32),
    SetFan(FanLevel),
    SetMode(OperationMode),
    Power(bool),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fan_level_wire_encoding_round_trips() {
        for level in [
            FanLevel::Auto,
            FanLevel::Low,
            FanLevel::Medium,
            FanLevel::High,
        ] {
            assert_eq!(FanLevel::from_wire_level(level.wire_level()), Some(level));
        }
        assert_eq!(FanLevel::from_wire_level(7), None);
    }

    #[test]
    fn ac_type_serde_uses_hyphenated_name() {
        let json = serde_json::to_string(&AcType::NonInverter).unwrap();
        assert_eq!(json, "\"non-inverter\"");
        let back: AcType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AcType::NonInverter);
    }

    #[test]
    fn parses_modes_case_insensitively() {
        assert_eq!(OperationMode::parse("DRY"), Some(OperationMode::Dry));
        assert_eq!(
            ControlMode::parse("Automatic"),
            Some(ControlMode::Automatic)
        );
        assert_eq!(OperationMode::parse("heat"), None);
    }
}
