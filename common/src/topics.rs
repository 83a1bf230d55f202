//! MQTT topic layout. Telemetry arrives keyed by platform series id so the
//! same id addresses both live values and the historical API; commands are
//! keyed by device id.

pub const TOPIC_TELE_WILDCARD: &str = "aircomfort/tele/#";
const TELE_PREFIX: &str = "aircomfort/tele/";

pub fn telemetry_topic(series_id: &str) -> String {
    format!("{TELE_PREFIX}{series_id}")
}

/// Series id of a telemetry topic, if it is one.
pub fn series_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TELE_PREFIX)
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

pub fn cmd_target_topic(device_id: &str) -> String {
    format!("aircomfort/cmnd/{device_id}/target")
}

pub fn cmd_power_topic(device_id: &str) -> String {
    format!("aircomfort/cmnd/{device_id}/power")
}

pub fn cmd_mode_topic(device_id: &str) -> String {
    format!("aircomfort/cmnd/{device_id}/mode")
}

pub fn cmd_fan_topic(device_id: &str) -> String {
    format!("aircomfort/cmnd/{device_id}/fan")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn telemetry_topics_round_trip() {
        let topic = telemetry_topic("1207");
        assert_eq!(topic, "aircomfort/tele/1207");
        assert_eq!(series_from_topic(&topic), Some("1207"));
    }

    #[test]
    fn non_telemetry_topics_are_rejected() {
        assert_eq!(series_from_topic("aircomfort/cmnd/ac-1/target"), None);
        assert_eq!(series_from_topic("aircomfort/tele/"), None);
        assert_eq!(series_from_topic("aircomfort/tele/a/b"), None);
    }
}
