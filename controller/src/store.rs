use std::{collections::HashMap, io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;

use aircomfort_common::{ActionLogEntry, Bill, OverrideEvent, RuntimeConfig};

use crate::{
    collab::RecordStore,
    error::{Error, Result},
};

pub const ACTION_LOG_CAP: usize = 1000;
pub const OVERRIDE_LOG_CAP: usize = aircomfort_common::OVERRIDE_LOG_CAP;

/// A stored period record. Early deployments wrote the begin value as a bare
/// number; both shapes must keep reading transparently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Legacy(f64),
    Record {
        #[serde(default)]
        begin: Option<f64>,
        #[serde(default)]
        end: Option<f64>,
    },
}

impl StoredRecord {
    fn begin(&self) -> Option<f64> {
        match self {
            Self::Legacy(value) => Some(*value),
            Self::Record { begin, .. } => *begin,
        }
    }

    fn end(&self) -> Option<f64> {
        match self {
            Self::Legacy(_) => None,
            Self::Record { end, .. } => *end,
        }
    }
}

type BaselineFile = HashMap<String, HashMap<String, StoredRecord>>;
type OverrideFile = HashMap<String, Vec<OverrideEvent>>;
type ActionFile = HashMap<String, Vec<ActionLogEntry>>;

/// JSON-file persistence under the data directory. One mutex serialises all
/// writers; readers re-read from disk so an external edit is picked up on the
/// next call.
pub struct JsonStore {
    config_path: PathBuf,
    baselines_path: PathBuf,
    overrides_path: PathBuf,
    actions_path: PathBuf,
    bills_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            config_path: data_dir.join("config.json"),
            baselines_path: data_dir.join("baselines.json"),
            overrides_path: data_dir.join("overrides.json"),
            actions_path: data_dir.join("actions.json"),
            bills_path: data_dir.join("bills.json"),
            lock: Mutex::new(()),
        }
    }

    pub fn from_env() -> Self {
        let data_dir = std::env::var("AIRCOMFORT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.aircomfort"));
        Self::new(data_dir)
    }

    pub async fn load_config(&self) -> Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        read_json(&self.config_path).await
    }

    pub async fn save_config(&self, config: &RuntimeConfig) -> Result<()> {
        let _guard = self.lock.lock().await;
        write_json(&self.config_path, config).await
    }

    pub async fn load_overrides(&self, device_id: &str) -> Result<Vec<OverrideEvent>> {
        let _guard = self.lock.lock().await;
        let file: OverrideFile = read_json(&self.overrides_path).await?;
        Ok(file.get(device_id).cloned().unwrap_or_default())
    }

    pub async fn append_override(&self, device_id: &str, event: OverrideEvent) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file: OverrideFile = read_json(&self.overrides_path).await?;
        let log = file.entry(device_id.to_string()).or_default();
        log.push(event);
        if log.len() > OVERRIDE_LOG_CAP {
            let excess = log.len() - OVERRIDE_LOG_CAP;
            log.drain(..excess);
        }
        write_json(&self.overrides_path, &file).await
    }

    pub async fn load_actions(&self, device_id: &str) -> Result<Vec<ActionLogEntry>> {
        let _guard = self.lock.lock().await;
        let file: ActionFile = read_json(&self.actions_path).await?;
        Ok(file.get(device_id).cloned().unwrap_or_default())
    }

    pub async fn append_action(&self, device_id: &str, entry: ActionLogEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file: ActionFile = read_json(&self.actions_path).await?;
        let log = file.entry(device_id.to_string()).or_default();
        log.push(entry);
        if log.len() > ACTION_LOG_CAP {
            let excess = log.len() - ACTION_LOG_CAP;
            log.drain(..excess);
        }
        write_json(&self.actions_path, &file).await
    }

    pub async fn load_bills(&self) -> Result<Vec<Bill>> {
        let _guard = self.lock.lock().await;
        let mut bills: Vec<Bill> = read_json(&self.bills_path).await?;
        bills.sort_by(|a, b| a.month.cmp(&b.month));
        Ok(bills)
    }

    pub async fn add_bill(&self, bill: Bill) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut bills: Vec<Bill> = read_json(&self.bills_path).await?;
        bills.push(bill);
        write_json(&self.bills_path, &bills).await
    }

    pub async fn delete_bill(&self, bill_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut bills: Vec<Bill> = read_json(&self.bills_path).await?;
        let before = bills.len();
        bills.retain(|bill| bill.id != bill_id);
        let removed = bills.len() != before;
        if removed {
            write_json(&self.bills_path, &bills).await?;
        }
        Ok(removed)
    }

    async fn read_record(&self, device_id: &str, period_key: &str) -> Result<Option<StoredRecord>> {
        let file: BaselineFile = read_json(&self.baselines_path).await?;
        Ok(file
            .get(device_id)
            .and_then(|records| records.get(period_key))
            .cloned())
    }

    async fn write_record(
        &self,
        device_id: &str,
        period_key: &str,
        record: StoredRecord,
    ) -> Result<()> {
        let mut file: BaselineFile = read_json(&self.baselines_path).await?;
        file.entry(device_id.to_string())
            .or_default()
            .insert(period_key.to_string(), record);
        write_json(&self.baselines_path, &file).await
    }
}

#[async_trait]
impl RecordStore for JsonStore {
    async fn baseline(&self, device_id: &str, period_key: &str) -> Result<Option<f64>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_record(device_id, period_key)
            .await?
            .and_then(|record| record.begin()))
    }

    async fn set_baseline(&self, device_id: &str, period_key: &str, value: f64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let end = self
            .read_record(device_id, period_key)
            .await?
            .and_then(|record| record.end());
        self.write_record(
            device_id,
            period_key,
            StoredRecord::Record {
                begin: Some(value),
                end,
            },
        )
        .await
    }

    async fn end_value(&self, device_id: &str, period_key: &str) -> Result<Option<f64>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read_record(device_id, period_key)
            .await?
            .and_then(|record| record.end()))
    }

    async fn set_end_value(&self, device_id: &str, period_key: &str, value: f64) -> Result<()> {
        let _guard = self.lock.lock().await;
        // A legacy bare number is the begin value; migrating must not lose it.
        let begin = self
            .read_record(device_id, period_key)
            .await?
            .and_then(|record| record.begin());
        self.write_record(
            device_id,
            period_key,
            StoredRecord::Record {
                begin,
                end: Some(value),
            },
        )
        .await
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &PathBuf) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice(&raw).map_err(Error::from),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

async fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn temp_store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn baseline_round_trips() {
        let (_dir, store) = temp_store();

        assert_eq!(store.baseline("ac-1", "2026-07-15").await.unwrap(), None);
        store.set_baseline("ac-1", "2026-07-15", 120.5).await.unwrap();
        assert_eq!(
            store.baseline("ac-1", "2026-07-15").await.unwrap(),
            Some(120.5)
        );
        // Other devices and periods stay isolated.
        assert_eq!(store.baseline("ac-2", "2026-07-15").await.unwrap(), None);
        assert_eq!(store.baseline("ac-1", "2026-07-16").await.unwrap(), None);
    }

    #[tokio::test]
    async fn legacy_bare_number_reads_as_begin_value() {
        let (dir, store) = temp_store();
        let raw = r#"{"ac-1": {"2026-07-15": 98.25}}"#;
        tokio::fs::write(dir.path().join("baselines.json"), raw)
            .await
            .unwrap();

        assert_eq!(
            store.baseline("ac-1", "2026-07-15").await.unwrap(),
            Some(98.25)
        );
        assert_eq!(store.end_value("ac-1", "2026-07-15").await.unwrap(), None);
    }

    #[tokio::test]
    async fn writing_end_value_over_legacy_number_preserves_begin() {
        let (dir, store) = temp_store();
        let raw = r#"{"ac-1": {"2026-07-15": 98.25}}"#;
        tokio::fs::write(dir.path().join("baselines.json"), raw)
            .await
            .unwrap();

        store
            .set_end_value("ac-1", "2026-07-15", 101.0)
            .await
            .unwrap();

        assert_eq!(
            store.baseline("ac-1", "2026-07-15").await.unwrap(),
            Some(98.25)
        );
        assert_eq!(
            store.end_value("ac-1", "2026-07-15").await.unwrap(),
            Some(101.0)
        );
    }

    #[tokio::test]
    async fn end_value_updates_are_last_write_wins() {
        let (_dir, store) = temp_store();
        store.set_baseline("ac-1", "2026-07-15", 98.0).await.unwrap();
        store.set_end_value("ac-1", "2026-07-15", 99.0).await.unwrap();
        store.set_end_value("ac-1", "2026-07-15", 99.5).await.unwrap();

        assert_eq!(
            store.end_value("ac-1", "2026-07-15").await.unwrap(),
            Some(99.5)
        );
        assert_eq!(
            store.baseline("ac-1", "2026-07-15").await.unwrap(),
            Some(98.0)
        );
    }

    #[tokio::test]
    async fn override_log_is_capped_fifo() {
        let (_dir, store) = temp_store();
        for i in 0..(OVERRIDE_LOG_CAP + 5) {
            store
                .append_override(
                    "ac-1",
                    OverrideEvent {
                        timestamp: Utc::now(),
                        old_temp: 26,
                        new_temp: 20 + (i % 5) as i32,
                    },
                )
                .await
                .unwrap();
        }

        let log = store.load_overrides("ac-1").await.unwrap();
        assert_eq!(log.len(), OVERRIDE_LOG_CAP);
        // Oldest entries dropped: the first surviving entry is i = 5.
        assert_eq!(log[0].new_temp, 20);
    }

    #[tokio::test]
    async fn bills_add_list_delete() {
        let (_dir, store) = temp_store();
        store
            .add_bill(Bill {
                id: "b2".to_string(),
                month: "2026-02".to_string(),
                kwh: 280.0,
                amount: 840_000.0,
                is_before: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .add_bill(Bill {
                id: "b1".to_string(),
                month: "2026-01".to_string(),
                kwh: 320.0,
                amount: 960_000.0,
                is_before: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let bills = store.load_bills().await.unwrap();
        assert_eq!(bills.len(), 2);
        // Sorted by month.
        assert_eq!(bills[0].id, "b1");

        assert!(store.delete_bill("b2").await.unwrap());
        assert!(!store.delete_bill("b2").await.unwrap());
        assert_eq!(store.load_bills().await.unwrap().len(), 1);
    }
}
