use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use sensor_api::{
    MeasurementRecord, MeasurementStore, NewMeasurement, PageQuery, SensorSummary, SettingItem,
    SettingsStore, StoreError, now_ms,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryStorageConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryStorageConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStorage
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Measurements {
    rows: VecDeque<MeasurementRecord>,
    next_id: i64,
    /// Newest `created_at_ms` handed out, kept across ring eviction.
    last_created_at_ms: i64,
}

#[derive(Default)]
struct SensorEntry {
    name: Option<String>,
    last_seen_ms: i64,
    measurements: BTreeSet<String>,
}

/// In-memory ring-buffer storage. Nothing survives a restart; once
/// `max_records` is reached the oldest row is evicted on every insert.
pub struct MemoryStorage {
    measurements: RwLock<Measurements>,
    sensors: RwLock<BTreeMap<String, SensorEntry>>,
    settings: RwLock<BTreeMap<String, SettingItem>>,
    max_records: usize,
}

impl MemoryStorage {
    pub fn new(max_records: usize) -> Self {
        Self {
            measurements: RwLock::new(Measurements {
                rows: VecDeque::with_capacity(max_records.min(65536)),
                next_id: 1,
                last_created_at_ms: 0,
            }),
            sensors: RwLock::new(BTreeMap::new()),
            settings: RwLock::new(BTreeMap::new()),
            max_records,
        }
    }

    pub fn from_config(config: &MemoryStorageConfig) -> Self {
        Self::new(config.max_records)
    }

    /// Number of rows currently held.
    pub async fn len(&self) -> usize {
        self.measurements.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::from_config(&MemoryStorageConfig::default())
    }
}

impl MeasurementStore for MemoryStorage {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn insert(
        &self,
        row: NewMeasurement,
    ) -> Pin<Box<dyn Future<Output = Result<MeasurementRecord, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut buf = self.measurements.write().await;
            let id = buf.next_id;
            buf.next_id += 1;
            let created_at_ms = row.created_at_ms.max(buf.last_created_at_ms);
            buf.last_created_at_ms = created_at_ms;
            let record = MeasurementRecord::from_new(id, NewMeasurement { created_at_ms, ..row });
            if self.max_records > 0 && buf.rows.len() >= self.max_records {
                buf.rows.pop_front();
            }
            buf.rows.push_back(record.clone());
            Ok(record)
        })
    }

    fn query_page(
        &self,
        query: &PageQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MeasurementRecord>, StoreError>> + Send + '_>> {
        let query = query.clone();
        Box::pin(async move {
            let buf = self.measurements.read().await;
            let mut result: Vec<MeasurementRecord> = buf
                .rows
                .iter()
                .filter(|r| {
                    if let Some(ref sensor) = query.sensor_id {
                        if r.sensor_id.as_deref() != Some(sensor.as_str()) {
                            return false;
                        }
                    }
                    match query.after {
                        Some(key) => key.admits(r.created_at_ms, r.id),
                        None => true,
                    }
                })
                .cloned()
                .collect();

            result.sort_by(|a, b| {
                b.created_at_ms
                    .cmp(&a.created_at_ms)
                    .then_with(|| b.id.cmp(&a.id))
            });
            result.truncate(query.limit);
            Ok(result)
        })
    }

    fn delete_oldest_batch(
        &self,
        cutoff_ms: i64,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut buf = self.measurements.write().await;
            let mut expired: Vec<(i64, i64)> = buf
                .rows
                .iter()
                .filter(|r| r.ts_ms < cutoff_ms)
                .map(|r| (r.ts_ms, r.id))
                .collect();
            expired.sort_unstable();
            expired.truncate(batch_size);

            let doomed: HashSet<i64> = expired.into_iter().map(|(_, id)| id).collect();
            buf.rows.retain(|r| !doomed.contains(&r.id));
            Ok(doomed.len() as u64)
        })
    }

    fn upsert_sensor_last_seen<'a>(
        &'a self,
        sensor_id: &'a str,
        sensor_name: Option<&'a str>,
        measurements: &'a [String],
        ts_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut sensors = self.sensors.write().await;
            let entry = sensors.entry(sensor_id.to_string()).or_default();
            if entry.name.is_none() {
                entry.name = sensor_name.map(str::to_string);
            }
            entry.last_seen_ms = ts_ms;
            entry.measurements.extend(measurements.iter().cloned());
            Ok(())
        })
    }

    fn sensors(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SensorSummary>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let sensors = self.sensors.read().await;
            Ok(sensors
                .iter()
                .map(|(id, entry)| SensorSummary {
                    sensor_id: id.clone(),
                    sensor_name: entry.name.clone(),
                    last_seen_ms: entry.last_seen_ms,
                    measurements: entry.measurements.iter().cloned().collect(),
                })
                .collect())
        })
    }
}

impl SettingsStore for MemoryStorage {
    fn settings(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SettingItem>, StoreError>> + Send + '_>> {
        Box::pin(async move { Ok(self.settings.read().await.values().cloned().collect()) })
    }

    fn setting<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SettingItem>, StoreError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.settings.read().await.get(key).cloned()) })
    }

    fn upsert_setting<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SettingItem, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let item = SettingItem {
                key: key.to_string(),
                value: value.to_string(),
                updated_at_ms: now_ms(),
            };
            self.settings
                .write()
                .await
                .insert(key.to_string(), item.clone());
            Ok(item)
        })
    }

    fn ensure_defaults<'a>(
        &'a self,
        defaults: &'a [(&'a str, &'a str)],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut settings = self.settings.write().await;
            let now = now_ms();
            for (key, value) in defaults {
                settings.entry(key.to_string()).or_insert_with(|| SettingItem {
                    key: key.to_string(),
                    value: value.to_string(),
                    updated_at_ms: now,
                });
            }
            Ok(())
        })
    }
}
