use serde::{Deserialize, Serialize};

use crate::types::{ControlMode, DeviceProfile};

/// Tuning knobs for the comfort engine and its surrounding loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComfortTuning {
    pub base_target_c: f64,
    pub min_target_c: i32,
    pub max_target_c: i32,
    pub action_cooldown_ms: u64,
    pub evaluate_interval_ms: u64,
    pub end_value_debounce_ms: u64,
    pub consumption_poll_ms: u64,
    pub override_window_days: i64,
    pub override_window_hours: f64,
}

impl Default for ComfortTuning {
    fn default() -> Self {
        Self {
            base_target_c: 26.0,
            min_target_c: 16,
            max_target_c: 30,
            action_cooldown_ms: 300_000,
            evaluate_interval_ms: 300_000,
            end_value_debounce_ms: 5_000,
            consumption_poll_ms: 60_000,
            override_window_days: 7,
            override_window_hours: 3.0,
        }
    }
}

impl ComfortTuning {
    pub fn sanitize(&mut self) {
        if self.min_target_c >= self.max_target_c {
            self.min_target_c = 16;
            self.max_target_c = 30;
        }
        self.base_target_c = self
            .base_target_c
            .clamp(self.min_target_c as f64, self.max_target_c as f64);
        self.action_cooldown_ms = self.action_cooldown_ms.max(1_000);
        self.evaluate_interval_ms = self.evaluate_interval_ms.max(1_000);
        self.end_value_debounce_ms = self.end_value_debounce_ms.clamp(500, 60_000);
        self.consumption_poll_ms = self.consumption_poll_ms.max(5_000);
        self.override_window_days = self.override_window_days.max(1);
        if !self.override_window_hours.is_finite() || self.override_window_hours <= 0.0 {
            self.override_window_hours = 3.0;
        }
    }
}

/// Which platform series feed each sensor of a device. A missing entry means
/// the dependent computation is skipped, never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeMap {
    #[serde(default)]
    pub temperature: Option<String>,
    #[serde(default)]
    pub humidity: Option<String>,
    #[serde(default)]
    pub energy: Option<String>,
    #[serde(default)]
    pub outdoor_temperature: Option<String>,
    #[serde(default)]
    pub target_temperature: Option<String>,
    #[serde(default)]
    pub power: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fan: Option<String>,
}

impl AttributeMap {
    /// True when nothing at all is mapped; such a device cannot be observed.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.humidity.is_none()
            && self.energy.is_none()
            && self.outdoor_temperature.is_none()
            && self.target_temperature.is_none()
            && self.power.is_none()
            && self.mode.is_none()
            && self.fan.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub room_name: String,
    #[serde(flatten)]
    pub profile: DeviceProfile,
    pub control_mode: ControlMode,
    #[serde(default)]
    pub attributes: AttributeMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
        }
    }
}

/// Endpoint of the platform's historical value API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryApiConfig {
    pub base_url: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub comfort: ComfortTuning,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub history: Option<HistoryApiConfig>,
    pub timezone: String,
    pub price_per_kwh: f64,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            comfort: ComfortTuning::default(),
            mqtt: MqttConfig::default(),
            history: None,
            timezone: "Asia/Ho_Chi_Minh".to_string(),
            price_per_kwh: 3000.0,
            devices: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.comfort.sanitize();
        if !self.price_per_kwh.is_finite() || self.price_per_kwh < 0.0 {
            self.price_per_kwh = 3000.0;
        }
        self.devices.retain(|device| !device.id.is_empty());
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|device| device.id == device_id)
    }

    pub fn device_mut(&mut self, device_id: &str) -> Option<&mut DeviceConfig> {
        self.devices
            .iter_mut()
            .find(|device| device.id == device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_restores_inverted_clamp_range() {
        let mut tuning = ComfortTuning {
            min_target_c: 30,
            max_target_c: 16,
            ..ComfortTuning::default()
        };
        tuning.sanitize();
        assert_eq!(tuning.min_target_c, 16);
        assert_eq!(tuning.max_target_c, 30);
    }

    #[test]
    fn sanitize_drops_devices_without_id() {
        let mut config = RuntimeConfig::default();
        config.devices.push(DeviceConfig {
            id: String::new(),
            name: "ghost".to_string(),
            room_name: "nowhere".to_string(),
            profile: DeviceProfile::default(),
            control_mode: ControlMode::Manual,
            attributes: AttributeMap::default(),
        });
        config.sanitize();
        assert!(config.devices.is_empty());
    }

    #[test]
    fn device_config_round_trips_with_flattened_profile() {
        let device = DeviceConfig {
            id: "ac-1".to_string(),
            name: "Living room".to_string(),
            room_name: "Living".to_string(),
            profile: DeviceProfile::default(),
            control_mode: ControlMode::Automatic,
            attributes: AttributeMap {
                energy: Some("1207".to_string()),
                ..AttributeMap::default()
            },
        };

        let json = serde_json::to_string(&device).unwrap();
        let back: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.profile.capacity_btu, 9000);
        assert_eq!(back.attributes.energy.as_deref(), Some("1207"));
    }
}
