use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Topic Key
// ════════════════════════════════════════════════════════════════

/// Routing key of a broadcast event / filter of a subscriber.
///
/// `All` is the sentinel for readings without a sensor identifier and for
/// subscribers that did not ask for a particular sensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicKey {
    All,
    Sensor(String),
}

impl TopicKey {
    /// Empty and missing identifiers both map to `All`.
    pub fn from_sensor(sensor_id: Option<&str>) -> Self {
        match sensor_id {
            Some(id) if !id.is_empty() => TopicKey::Sensor(id.to_string()),
            _ => TopicKey::All,
        }
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicKey::All => f.write_str("*"),
            TopicKey::Sensor(id) => f.write_str(id),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Measurements
// ════════════════════════════════════════════════════════════════

/// One reading inside an ingested batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementValue {
    /// Measurement kind, e.g. "temperature", "pm".
    pub measurement: String,
    /// Optional sub-dimension, e.g. particle size bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Row handed to storage. `id` is assigned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMeasurement {
    pub sensor_id: Option<String>,
    pub sensor_name: Option<String>,
    pub measurement: String,
    pub parameter: Option<String>,
    pub value: f64,
    pub unit: Option<String>,
    /// When the physical reading happened (Unix ms).
    pub ts_ms: i64,
    /// When the row was persisted (Unix ms, whole seconds). A lower bound:
    /// the store may raise it to keep creation times monotonic.
    pub created_at_ms: i64,
}

/// Stored reading. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_name: Option<String>,
    pub measurement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub ts_ms: i64,
    pub created_at_ms: i64,
}

impl MeasurementRecord {
    pub fn from_new(id: i64, row: NewMeasurement) -> Self {
        Self {
            id,
            sensor_id: row.sensor_id,
            sensor_name: row.sensor_name,
            measurement: row.measurement,
            parameter: row.parameter,
            value: row.value,
            unit: row.unit,
            ts_ms: row.ts_ms,
            created_at_ms: row.created_at_ms,
        }
    }

    /// Position of this row in the (created_at DESC, id DESC) order.
    pub fn page_key(&self) -> PageKey {
        PageKey {
            created_at_ms: self.created_at_ms,
            id: self.id,
        }
    }
}

/// Broadcast payload for one ingestion occurrence. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_name: Option<String>,
    /// Effective event timestamp of the batch (Unix ms).
    pub ts_ms: i64,
    /// Whether the store-interval gate let this batch through to storage.
    pub persisted: bool,
    pub values: Vec<MeasurementValue>,
}

impl MeasurementEvent {
    pub fn topic(&self) -> TopicKey {
        TopicKey::from_sensor(self.sensor_id.as_deref())
    }
}

// ════════════════════════════════════════════════════════════════
//  Keyset pagination
// ════════════════════════════════════════════════════════════════

/// (creation timestamp, id): the total order used to page stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageKey {
    #[serde(rename = "created_at")]
    pub created_at_ms: i64,
    pub id: i64,
}

impl PageKey {
    /// True when a row at (`created_at_ms`, `id`) is strictly older than this key.
    pub fn admits(&self, created_at_ms: i64, id: i64) -> bool {
        created_at_ms < self.created_at_ms
            || (created_at_ms == self.created_at_ms && id < self.id)
    }
}

/// Storage-level page request: newest first, strictly older than `after`.
#[derive(Debug, Clone, Default)]
pub struct PageQuery {
    pub sensor_id: Option<String>,
    pub after: Option<PageKey>,
    /// Exact number of rows to fetch (callers add the look-ahead row).
    pub limit: usize,
}

// ════════════════════════════════════════════════════════════════
//  Sensors & settings
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSummary {
    pub sensor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_name: Option<String>,
    pub last_seen_ms: i64,
    /// Measurement kinds ever persisted for this sensor, sorted.
    pub measurements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingItem {
    pub key: String,
    pub value: String,
    pub updated_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_key_treats_empty_id_as_all() {
        assert_eq!(TopicKey::from_sensor(None), TopicKey::All);
        assert_eq!(TopicKey::from_sensor(Some("")), TopicKey::All);
        assert_eq!(
            TopicKey::from_sensor(Some("kitchen")),
            TopicKey::Sensor("kitchen".into())
        );
    }

    #[test]
    fn page_key_breaks_ties_by_id() {
        let key = PageKey { created_at_ms: 10_000, id: 4 };
        assert!(key.admits(10_000, 3));
        assert!(!key.admits(10_000, 4));
        assert!(!key.admits(10_000, 5));
        assert!(key.admits(9_000, 100));
        assert!(!key.admits(11_000, 1));
    }
}
