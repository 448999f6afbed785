use std::future::Future;
use std::pin::Pin;

use crate::{
    MeasurementRecord, NewMeasurement, PageQuery, SensorSummary, SettingItem, StoreError,
};

// ════════════════════════════════════════════════════════════════
//  Storage Traits
// ════════════════════════════════════════════════════════════════

/// Persistent measurement history.
///
/// Implementations: SQLite (durable), in-memory ring buffer (tests, demos).
/// All methods are safe to call concurrently.
pub trait MeasurementStore: Send + Sync {
    /// Create tables / indexes. Called once before the server accepts requests.
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Insert one row and return it as stored.
    ///
    /// The stored `created_at_ms` is `row.created_at_ms` raised to the
    /// newest creation time already assigned, so creation times never
    /// decrease in id order even when concurrent callers race.
    fn insert(
        &self,
        row: NewMeasurement,
    ) -> Pin<Box<dyn Future<Output = Result<MeasurementRecord, StoreError>> + Send + '_>>;

    /// Rows ordered by (created_at DESC, id DESC), strictly older than
    /// `query.after` when set, at most `query.limit` of them.
    fn query_page(
        &self,
        query: &PageQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MeasurementRecord>, StoreError>> + Send + '_>>;

    /// Delete up to `batch_size` rows with `ts_ms < cutoff_ms`, oldest first.
    /// Returns the number of rows removed.
    fn delete_oldest_batch(
        &self,
        cutoff_ms: i64,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>>;

    /// Record that a sensor was seen at `ts_ms` reporting `measurements`.
    fn upsert_sensor_last_seen<'a>(
        &'a self,
        sensor_id: &'a str,
        sensor_name: Option<&'a str>,
        measurements: &'a [String],
        ts_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    /// All known sensors, ordered by id.
    fn sensors(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SensorSummary>, StoreError>> + Send + '_>>;
}

/// Key/value store behind the live-tunable settings.
pub trait SettingsStore: Send + Sync {
    fn settings(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SettingItem>, StoreError>> + Send + '_>>;

    fn setting<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SettingItem>, StoreError>> + Send + 'a>>;

    /// Insert or replace `key` and return the stored item.
    fn upsert_setting<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SettingItem, StoreError>> + Send + 'a>>;

    /// Insert every `(key, value)` pair that is not stored yet; existing keys
    /// keep their value.
    fn ensure_defaults<'a>(
        &'a self,
        defaults: &'a [(&'a str, &'a str)],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}
