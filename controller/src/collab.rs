//! Collaborator seams for the energy engine. Every external dependency the
//! engine touches arrives as an injected trait object, so tests run against
//! in-memory fakes and the resolution order stays observable.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use aircomfort_common::{ControlAction, EnergyReading};

use crate::error::Result;

/// Plain string key-value cache. No TTL: validity is judged from the value
/// itself, never from age.
#[async_trait]
pub trait ValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String);
    async fn remove(&self, key: &str);
}

/// Persistent per-device period records (begin/end counter values).
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn baseline(&self, device_id: &str, period_key: &str) -> Result<Option<f64>>;
    async fn set_baseline(&self, device_id: &str, period_key: &str, value: f64) -> Result<()>;
    async fn end_value(&self, device_id: &str, period_key: &str) -> Result<Option<f64>>;
    async fn set_end_value(&self, device_id: &str, period_key: &str, value: f64) -> Result<()>;
}

/// Historical counter readings from the platform. The returned series may be
/// empty and is never assumed sorted.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(
        &self,
        series_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EnergyReading>>;
}

/// Outbound command channel to a unit. Fire-and-forget: `true` means the
/// command was handed to the transport, not that the device honored it.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    async fn send_command(&self, device_id: &str, action: ControlAction) -> bool;
}

#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().await.get(key).cloned()
    }

    async fn set(&self, key: &str, value: String) {
        self.inner.lock().await.insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) {
        self.inner.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_set_get_remove() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await, None);

        cache.set("k", "12.5".to_string()).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("12.5"));

        cache.remove("k").await;
        assert_eq!(cache.get("k").await, None);
    }
}
