use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, Incoming, QoS};
use tokio::sync::RwLock;
use tracing::{info, warn};

use aircomfort_common::{topics, ControlAction};

use crate::collab::DeviceChannel;

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

/// Latest numeric value reported for a platform series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveReading {
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// Last-known telemetry per series id, fed by the MQTT ingest loop and read
/// by everything that needs current sensor or counter values.
#[derive(Default)]
pub struct LiveValues {
    inner: RwLock<HashMap<String, LiveReading>>,
}

impl LiveValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, series_id: &str, value: f64, at: DateTime<Utc>) {
        self.inner
            .write()
            .await
            .insert(series_id.to_string(), LiveReading { value, at });
    }

    pub async fn reading(&self, series_id: &str) -> Option<LiveReading> {
        self.inner.read().await.get(series_id).copied()
    }

    pub async fn value(&self, series_id: &str) -> Option<f64> {
        self.reading(series_id).await.map(|reading| reading.value)
    }
}

/// Command channel over MQTT. Fire-and-forget: the publish result says the
/// message reached the client queue, nothing more, and the host's optimistic
/// state is reconciled by the next reported reading instead of an ack.
pub struct MqttChannel {
    client: AsyncClient,
}

impl MqttChannel {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceChannel for MqttChannel {
    async fn send_command(&self, device_id: &str, action: ControlAction) -> bool {
        let (topic, payload) = match action {
            ControlAction::SetTarget(temp) => (topics::cmd_target_topic(device_id), temp.to_string()),
            ControlAction::Power(on) => (
                topics::cmd_power_topic(device_id),
                if on { "on" } else { "off" }.to_string(),
            ),
            ControlAction::SetMode(mode) => {
                (topics::cmd_mode_topic(device_id), mode.as_str().to_string())
            }
            ControlAction::SetFan(level) => (
                topics::cmd_fan_topic(device_id),
                level.wire_level().to_string(),
            ),
        };

        match self
            .client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!("command publish to {topic} failed: {err}");
                false
            }
        }
    }
}

/// Drive the MQTT event loop, folding telemetry publishes into `live`.
pub fn spawn_mqtt_ingest(mut eventloop: rumqttc::EventLoop, live: Arc<LiveValues>) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    handle_publish(&live, &message.topic, &message.payload).await;
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_publish(live: &LiveValues, topic: &str, payload: &[u8]) {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return;
    }
    let Some(series_id) = topics::series_from_topic(topic) else {
        return;
    };
    let Ok(text) = std::str::from_utf8(payload) else {
        warn!("non utf8 telemetry payload on {topic}");
        return;
    };
    match text.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => {
            live.record(series_id, value, Utc::now()).await;
        }
        _ => warn!("unparseable telemetry payload on {topic}: {text:?}"),
    }
}
