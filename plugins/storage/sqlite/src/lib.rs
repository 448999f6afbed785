use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};

use sensor_api::{
    MeasurementRecord, MeasurementStore, NewMeasurement, PageQuery, SensorSummary, SettingItem,
    SettingsStore, StoreError, now_ms,
};

// ═══════════════════════════════════════════════════════════════
//  SqliteStorageConfig
// ═══════════════════════════════════════════════════════════════

fn default_path() -> PathBuf {
    PathBuf::from("api.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SqliteStorageConfig {
    /// Database file. Created on first start.
    #[serde(default = "default_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for SqliteStorageConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Schema
// ═══════════════════════════════════════════════════════════════

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS measurement (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sensor_id TEXT,
        sensor_name TEXT,
        measurement TEXT NOT NULL,
        parameter TEXT,
        value REAL NOT NULL,
        unit TEXT,
        timestamp_ms INTEGER NOT NULL,
        created_at_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_measurement_created_id
        ON measurement (created_at_ms DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_measurement_sensor_created_id
        ON measurement (sensor_id, created_at_ms DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_measurement_timestamp
        ON measurement (timestamp_ms);
    CREATE TABLE IF NOT EXISTS setting (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at_ms INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sensor (
        sensor_id TEXT PRIMARY KEY,
        sensor_name TEXT,
        last_seen_ms INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sensor_measurement (
        sensor_id TEXT NOT NULL,
        name TEXT NOT NULL,
        PRIMARY KEY (sensor_id, name)
    );
";

const MEASUREMENT_COLUMNS: &str =
    "id, sensor_id, sensor_name, measurement, parameter, value, unit, timestamp_ms, created_at_ms";

// ═══════════════════════════════════════════════════════════════
//  SqliteStorage
// ═══════════════════════════════════════════════════════════════

/// SQLite-backed measurement history and settings.
///
/// One connection behind a mutex; every call runs on the blocking pool so a
/// slow statement never stalls the async workers.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

impl SqliteStorage {
    pub fn open(config: &SqliteStorageConfig) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(&config.path, flags).map_err(|e| {
            StoreError::config(e.to_string()).with_context(format!("open '{}'", config.path.display()))
        })?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| db_error(e).with_context("journal_mode"))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| db_error(e).with_context("busy_timeout"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database, gone when the last clone is dropped.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| db_error(e).with_context("open in-memory"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = match conn.lock() {
                Ok(g) => g,
                Err(poisoned) => {
                    tracing::warn!("sqlite connection lock was poisoned, recovering");
                    poisoned.into_inner()
                }
            };
            f(&mut guard).map_err(|e| db_error(e).with_context(op))
        })
        .await
        .map_err(|e| StoreError::io(format!("{op}: blocking task failed: {e}")))?
    }
}

fn db_error(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::format_err(e.to_string()),
        other => StoreError::io(other.to_string()),
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MeasurementRecord> {
    Ok(MeasurementRecord {
        id: row.get(0)?,
        sensor_id: row.get(1)?,
        sensor_name: row.get(2)?,
        measurement: row.get(3)?,
        parameter: row.get(4)?,
        value: row.get(5)?,
        unit: row.get(6)?,
        ts_ms: row.get(7)?,
        created_at_ms: row.get(8)?,
    })
}

fn row_to_setting(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettingItem> {
    Ok(SettingItem {
        key: row.get(0)?,
        value: row.get(1)?,
        updated_at_ms: row.get(2)?,
    })
}

/// Build the keyset page statement and its bound values.
fn page_statement(query: &PageQuery) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(ref sensor) = query.sensor_id {
        conditions.push("sensor_id = ?".to_string());
        values.push(Value::Text(sensor.clone()));
    }
    if let Some(after) = query.after {
        conditions.push("(created_at_ms < ? OR (created_at_ms = ? AND id < ?))".to_string());
        values.push(Value::Integer(after.created_at_ms));
        values.push(Value::Integer(after.created_at_ms));
        values.push(Value::Integer(after.id));
    }

    let mut sql = format!("SELECT {MEASUREMENT_COLUMNS} FROM measurement");
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at_ms DESC, id DESC LIMIT ?");
    values.push(Value::Integer(i64::try_from(query.limit).unwrap_or(i64::MAX)));
    (sql, values)
}

impl MeasurementStore for SqliteStorage {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.with_conn("create schema", |conn| conn.execute_batch(SCHEMA))
                .await?;
            tracing::info!("sqlite schema ready");
            Ok(())
        })
    }

    fn insert(
        &self,
        row: NewMeasurement,
    ) -> Pin<Box<dyn Future<Output = Result<MeasurementRecord, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.with_conn("insert measurement", move |conn| {
                let (id, created_at_ms) = conn.query_row(
                    "INSERT INTO measurement
                        (sensor_id, sensor_name, measurement, parameter, value, unit, timestamp_ms, created_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7,
                        MAX(?8, COALESCE((SELECT MAX(created_at_ms) FROM measurement), 0)))
                     RETURNING id, created_at_ms",
                    params![
                        row.sensor_id,
                        row.sensor_name,
                        row.measurement,
                        row.parameter,
                        row.value,
                        row.unit,
                        row.ts_ms,
                        row.created_at_ms,
                    ],
                    |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
                )?;
                Ok(MeasurementRecord::from_new(id, NewMeasurement { created_at_ms, ..row }))
            })
            .await
        })
    }

    fn query_page(
        &self,
        query: &PageQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<MeasurementRecord>, StoreError>> + Send + '_>> {
        let (sql, values) = page_statement(query);
        Box::pin(async move {
            self.with_conn("query measurement page", move |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params_from_iter(values), row_to_record)?;
                rows.collect()
            })
            .await
        })
    }

    fn delete_oldest_batch(
        &self,
        cutoff_ms: i64,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>> {
        let batch = i64::try_from(batch_size).unwrap_or(i64::MAX);
        Box::pin(async move {
            let deleted = self
                .with_conn("delete expired measurements", move |conn| {
                    conn.execute(
                        "DELETE FROM measurement
                         WHERE id IN (
                             SELECT id FROM measurement
                             WHERE timestamp_ms < ?1
                             ORDER BY timestamp_ms, id
                             LIMIT ?2
                         )",
                        params![cutoff_ms, batch],
                    )
                })
                .await?;
            Ok(deleted as u64)
        })
    }

    fn upsert_sensor_last_seen<'a>(
        &'a self,
        sensor_id: &'a str,
        sensor_name: Option<&'a str>,
        measurements: &'a [String],
        ts_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        let sensor_id = sensor_id.to_string();
        let sensor_name = sensor_name.map(str::to_string);
        let measurements = measurements.to_vec();
        Box::pin(async move {
            self.with_conn("upsert sensor", move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO sensor (sensor_id, sensor_name, last_seen_ms)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(sensor_id) DO UPDATE SET
                         last_seen_ms = excluded.last_seen_ms,
                         sensor_name = COALESCE(sensor.sensor_name, excluded.sensor_name)",
                    params![sensor_id, sensor_name, ts_ms],
                )?;
                for name in &measurements {
                    tx.execute(
                        "INSERT INTO sensor_measurement (sensor_id, name) VALUES (?1, ?2)
                         ON CONFLICT(sensor_id, name) DO NOTHING",
                        params![sensor_id, name],
                    )?;
                }
                tx.commit()
            })
            .await
        })
    }

    fn sensors(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SensorSummary>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.with_conn("list sensors", |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT s.sensor_id, s.sensor_name, s.last_seen_ms, sm.name
                     FROM sensor s
                     LEFT JOIN sensor_measurement sm ON sm.sensor_id = s.sensor_id
                     ORDER BY s.sensor_id, sm.name",
                )?;
                let mut rows = stmt.query([])?;
                let mut out: Vec<SensorSummary> = Vec::new();
                while let Some(row) = rows.next()? {
                    let sensor_id: String = row.get(0)?;
                    let measurement: Option<String> = row.get(3)?;
                    let same = out.last().is_some_and(|s| s.sensor_id == sensor_id);
                    if !same {
                        out.push(SensorSummary {
                            sensor_id,
                            sensor_name: row.get(1)?,
                            last_seen_ms: row.get(2)?,
                            measurements: Vec::new(),
                        });
                    }
                    if let (Some(name), Some(entry)) = (measurement, out.last_mut()) {
                        entry.measurements.push(name);
                    }
                }
                Ok(out)
            })
            .await
        })
    }
}

impl SettingsStore for SqliteStorage {
    fn settings(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SettingItem>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.with_conn("list settings", |conn| {
                let mut stmt =
                    conn.prepare_cached("SELECT key, value, updated_at_ms FROM setting ORDER BY key")?;
                let rows = stmt.query_map([], row_to_setting)?;
                rows.collect()
            })
            .await
        })
    }

    fn setting<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SettingItem>, StoreError>> + Send + 'a>> {
        let key = key.to_string();
        Box::pin(async move {
            self.with_conn("get setting", move |conn| {
                conn.query_row(
                    "SELECT key, value, updated_at_ms FROM setting WHERE key = ?1",
                    params![key],
                    row_to_setting,
                )
                .optional()
            })
            .await
        })
    }

    fn upsert_setting<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SettingItem, StoreError>> + Send + 'a>> {
        let key = key.to_string();
        let value = value.to_string();
        let now = now_ms();
        Box::pin(async move {
            self.with_conn("upsert setting", move |conn| {
                conn.execute(
                    "INSERT INTO setting (key, value, updated_at_ms) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                         value = excluded.value,
                         updated_at_ms = excluded.updated_at_ms",
                    params![key, value, now],
                )?;
                conn.query_row(
                    "SELECT key, value, updated_at_ms FROM setting WHERE key = ?1",
                    params![key],
                    row_to_setting,
                )
            })
            .await
        })
    }

    fn ensure_defaults<'a>(
        &'a self,
        defaults: &'a [(&'a str, &'a str)],
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        let defaults: Vec<(String, String)> = defaults
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let now = now_ms();
        Box::pin(async move {
            self.with_conn("ensure default settings", move |conn| {
                let tx = conn.transaction()?;
                for (key, value) in &defaults {
                    tx.execute(
                        "INSERT INTO setting (key, value, updated_at_ms) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO NOTHING",
                        params![key, value, now],
                    )?;
                }
                tx.commit()
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensor_api::PageKey;

    #[test]
    fn page_statement_binds_cursor_and_sensor() {
        let (sql, values) = page_statement(&PageQuery {
            sensor_id: Some("s1".into()),
            after: Some(PageKey { created_at_ms: 5000, id: 7 }),
            limit: 3,
        });
        assert!(sql.contains("WHERE sensor_id = ? AND (created_at_ms < ? OR (created_at_ms = ? AND id < ?))"));
        assert!(sql.ends_with("ORDER BY created_at_ms DESC, id DESC LIMIT ?"));
        assert_eq!(
            values,
            vec![
                Value::Text("s1".into()),
                Value::Integer(5000),
                Value::Integer(5000),
                Value::Integer(7),
                Value::Integer(3),
            ]
        );
    }

    #[test]
    fn page_statement_without_filters() {
        let (sql, values) = page_statement(&PageQuery { limit: 51, ..Default::default() });
        assert!(!sql.contains("WHERE"));
        assert_eq!(values, vec![Value::Integer(51)]);
    }
}
