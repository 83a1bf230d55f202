use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{info, warn};

use aircomfort_common::{topics, AttributeMap, RuntimeConfig};

/// Counter starting point. Downstream treats an exact zero as an
/// uninitialised meter, so simulated counters begin well above it.
const COUNTER_BASE_KWH: f64 = 100.0;
const PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

struct SimulatedDevice {
    attributes: AttributeMap,
    rated_power_w: f64,
    counter_kwh: f64,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config().await;
    if config.devices.is_empty() {
        warn!("no devices configured; nothing to simulate");
    }

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| config.mqtt.host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.mqtt.port);

    let mut mqtt_options = MqttOptions::new("aircomfort-simulator", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("simulator mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let mut devices: Vec<SimulatedDevice> = config
        .devices
        .iter()
        .enumerate()
        .map(|(index, device)| SimulatedDevice {
            attributes: device.attributes.clone(),
            rated_power_w: device.profile.rated_power_w,
            counter_kwh: COUNTER_BASE_KWH + index as f64 * 50.0,
        })
        .collect();

    info!("simulator publishing for {} devices", devices.len());

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(PUBLISH_INTERVAL);

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        for device in devices.iter_mut() {
            // Hardware integration point: replace the waves below with real
            // platform telemetry when wiring against live units.
            let temperature = 27.0 + ((tick % 8) as f64 * 0.2);
            let humidity = 55.0 + ((tick % 6) as f64 * 2.5);
            let outdoor = 33.0 + ((tick % 10) as f64 * 0.5);

            // Monotone cumulative energy: rated power over the interval,
            // modulated a little so charts are not flat.
            let duty = 0.6 + ((tick % 4) as f64 * 0.1);
            let interval_hours = PUBLISH_INTERVAL.as_secs_f64() / 3600.0;
            device.counter_kwh += device.rated_power_w / 1000.0 * duty * interval_hours;

            publish(&mqtt, device.attributes.temperature.as_deref(), temperature).await;
            publish(&mqtt, device.attributes.humidity.as_deref(), humidity).await;
            publish(&mqtt, device.attributes.outdoor_temperature.as_deref(), outdoor).await;
            publish(&mqtt, device.attributes.energy.as_deref(), device.counter_kwh).await;
        }
    }
}

async fn publish(mqtt: &AsyncClient, series_id: Option<&str>, value: f64) {
    let Some(series_id) = series_id else {
        return;
    };
    let topic = topics::telemetry_topic(series_id);
    let payload = format!("{value:.3}");
    if let Err(err) = mqtt
        .publish(topic.as_str(), QoS::AtLeastOnce, true, payload)
        .await
    {
        warn!("telemetry publish to {topic} failed: {err}");
    }
}

async fn load_config() -> RuntimeConfig {
    let data_dir = std::env::var("AIRCOMFORT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.aircomfort"));
    let path = data_dir.join("config.json");

    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice(&raw)
            .context("invalid config.json")
            .unwrap_or_else(|err| {
                warn!("failed to parse {}: {err:#}", path.display());
                RuntimeConfig::default()
            }),
        Err(err) => {
            warn!("failed to read {}: {err}", path.display());
            RuntimeConfig::default()
        }
    }
}
