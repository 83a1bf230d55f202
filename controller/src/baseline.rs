use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use aircomfort_common::PeriodWindow;

use crate::collab::{HistorySource, RecordStore, ValueCache};

/// A counter value usable as a period baseline. Exactly zero is treated as
/// uninitialised meter data, never as a legitimate starting point.
fn is_valid_baseline(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Resolves the starting counter value of a (device, period) pair and turns
/// the latest reading into a consumption figure.
///
/// Resolution walks three tiers strictly in order — local cache, record
/// store, time-series source — and short-circuits on the first valid hit.
/// The tiers must not race: a slower lower tier finishing after a valid
/// upper-tier result would clobber the cache with stale data. Every failure
/// path degrades to `None`; nothing here reaches callers as an error.
pub struct BaselineEngine {
    cache: Arc<dyn ValueCache>,
    store: Arc<dyn RecordStore>,
    history: Arc<dyn HistorySource>,
}

impl BaselineEngine {
    pub fn new(
        cache: Arc<dyn ValueCache>,
        store: Arc<dyn RecordStore>,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        Self {
            cache,
            store,
            history,
        }
    }

    fn cache_key(device_id: &str, period_key: &str) -> String {
        format!("baseline:{device_id}:{period_key}")
    }

    /// Resolve the begin value for `window`, consulting `live_reading` (the
    /// latest counter value seen over telemetry) only as the last-ditch
    /// fallback when the history source has nothing for the window.
    pub async fn resolve_baseline(
        &self,
        device_id: &str,
        series_id: Option<&str>,
        window: &PeriodWindow,
        live_reading: Option<f64>,
    ) -> Option<f64> {
        let key = Self::cache_key(device_id, &window.key);

        // Tier 1: local cache. A cached zero or unparseable entry is not
        // trusted; drop it so later resolutions re-derive.
        if let Some(raw) = self.cache.get(&key).await {
            match raw.trim().parse::<f64>() {
                Ok(value) if is_valid_baseline(value) => return Some(value),
                _ => {
                    debug!("discarding invalid cached baseline for {key}: {raw:?}");
                    self.cache.remove(&key).await;
                }
            }
        }

        // Tier 2: record store.
        match self.store.baseline(device_id, &window.key).await {
            Ok(Some(value)) if is_valid_baseline(value) => {
                self.cache.set(&key, value.to_string()).await;
                return Some(value);
            }
            Ok(_) => {}
            Err(err) => warn!("baseline store read failed for {key}: {err}"),
        }

        // Tier 3: time-series source over the whole anchor day, earliest
        // reading first. Falls back to the live counter value so a device
        // with no recorded history still starts counting from now.
        let mut resolved = None;
        if let Some(series_id) = series_id {
            match self
                .history
                .fetch_history(series_id, window.start, window.end)
                .await
            {
                Ok(mut readings) => {
                    readings.sort_by_key(|reading| reading.timestamp);
                    resolved = readings
                        .first()
                        .map(|reading| reading.value)
                        .filter(|value| is_valid_baseline(*value));
                }
                Err(err) => warn!("history fetch failed for {key}: {err}"),
            }
        }
        if resolved.is_none() {
            resolved = live_reading.filter(|value| is_valid_baseline(*value));
            if resolved.is_some() {
                debug!("using live counter reading as baseline for {key}");
            }
        }

        let value = resolved?;
        // Write-through so every tier answers directly next time.
        if let Err(err) = self.store.set_baseline(device_id, &window.key, value).await {
            warn!("baseline store write failed for {key}: {err}");
        }
        self.cache.set(&key, value.to_string()).await;
        Some(value)
    }
}

/// Consumption for a period: current counter minus begin value, clamped at
/// zero for meter resets. `None` (baseline unknown) stays `None` so callers
/// can tell "no data" from "zero consumption".
pub fn compute_consumption(current: f64, baseline: Option<f64>) -> Option<f64> {
    let begin = baseline.filter(|value| is_valid_baseline(*value))?;
    if !current.is_finite() {
        return None;
    }
    Some((current - begin).max(0.0))
}

struct PendingWrite {
    generation: u64,
    value: f64,
}

/// Debounced persistence of the latest counter reading as a period's end
/// value. Each new reading cancels the previous timer (generation token);
/// the write fires after the input has been quiet for the debounce window
/// and carries the newest value. Write failures are logged — the next burst
/// of readings retries naturally.
pub struct EndValueWriter {
    store: Arc<dyn RecordStore>,
    debounce: Duration,
    pending: Arc<Mutex<HashMap<(String, String), PendingWrite>>>,
}

impl EndValueWriter {
    pub fn new(store: Arc<dyn RecordStore>, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn submit(&self, device_id: &str, period_key: &str, value: f64) {
        if !value.is_finite() {
            return;
        }
        let key = (device_id.to_string(), period_key.to_string());

        let generation = {
            let mut pending = self.pending.lock().await;
            let entry = pending.entry(key.clone()).or_insert(PendingWrite {
                generation: 0,
                value,
            });
            entry.generation += 1;
            entry.value = value;
            entry.generation
        };

        let store = Arc::clone(&self.store);
        let pending = Arc::clone(&self.pending);
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let due = {
                let mut pending = pending.lock().await;
                match pending.get(&key) {
                    // Still the newest submission: claim it.
                    Some(entry) if entry.generation == generation => {
                        let value = entry.value;
                        pending.remove(&key);
                        Some(value)
                    }
                    _ => None,
                }
            };

            if let Some(value) = due {
                if let Err(err) = store.set_end_value(&key.0, &key.1, value).await {
                    warn!("end value write failed for {}/{}: {err}", key.0, key.1);
                }
            }
        });
    }
}
