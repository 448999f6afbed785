use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sensor_api::{
    MeasurementEvent, MeasurementRecord, MeasurementStore, MeasurementValue, NewMeasurement, TopicKey,
    truncate_to_second,
};

use crate::broker::Broker;
use crate::clock::Clock;
use crate::error::IngestError;
use crate::gate::{StoreGate, ThrottleScope};
use crate::settings::Settings;

/// One inbound batch from a sensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub sensor_id: Option<String>,
    #[serde(default)]
    pub sensor_name: Option<String>,
    /// Event time in Unix ms. Missing or zero means "now".
    #[serde(default)]
    pub ts_ms: Option<i64>,
    pub values: Vec<MeasurementValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    IntervalNotReached,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::IntervalNotReached => "store interval not reached",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Persisted(Vec<MeasurementRecord>),
    Skipped { reason: SkipReason },
}

impl IngestOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, IngestOutcome::Persisted(_))
    }
}

/// Entry point for inbound batches: broadcast always, persist when the
/// store-interval gate lets the batch through.
pub struct Ingestor {
    store: Arc<dyn MeasurementStore>,
    broker: Broker,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
    gate: StoreGate,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn MeasurementStore>,
        broker: Broker,
        settings: Arc<Settings>,
        clock: Arc<dyn Clock>,
        scope: ThrottleScope,
    ) -> Self {
        Self {
            store,
            broker,
            settings,
            clock,
            gate: StoreGate::new(scope),
        }
    }

    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome, IngestError> {
        validate(&req.values)?;

        let now = self.clock.now_ms();
        let ts_ms = req.ts_ms.filter(|&t| t != 0).unwrap_or(now);
        let sensor_id = req.sensor_id.filter(|s| !s.is_empty());
        let key = TopicKey::from_sensor(sensor_id.as_deref());

        let persist = self
            .gate
            .try_acquire(&key, now, self.settings.store_interval_ms());

        self.broker
            .publish(MeasurementEvent {
                sensor_id: sensor_id.clone(),
                sensor_name: req.sensor_name.clone(),
                ts_ms,
                persisted: persist,
                values: req.values.clone(),
            })
            .await;

        if !persist {
            tracing::debug!(sensor = %key, values = req.values.len(), "batch broadcast only");
            return Ok(IngestOutcome::Skipped {
                reason: SkipReason::IntervalNotReached,
            });
        }

        let created_at_ms = truncate_to_second(now);
        let mut records = Vec::with_capacity(req.values.len());
        for v in &req.values {
            let row = NewMeasurement {
                sensor_id: sensor_id.clone(),
                sensor_name: req.sensor_name.clone(),
                measurement: v.measurement.clone(),
                parameter: v.parameter.clone(),
                value: v.value,
                unit: v.unit.clone(),
                ts_ms,
                created_at_ms,
            };
            let record = self.store.insert(row).await.map_err(|e| {
                tracing::error!(sensor = %key, error = %e, "insert failed");
                e.with_context("insert measurement")
            })?;
            records.push(record);
        }

        if let Some(ref id) = sensor_id {
            let kinds: Vec<String> = req
                .values
                .iter()
                .map(|v| v.measurement.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if let Err(e) = self
                .store
                .upsert_sensor_last_seen(id, req.sensor_name.as_deref(), &kinds, ts_ms)
                .await
            {
                tracing::warn!(sensor = %id, error = %e, "sensor last-seen update failed");
            }
        }

        tracing::debug!(sensor = %key, rows = records.len(), "batch persisted");
        Ok(IngestOutcome::Persisted(records))
    }
}

fn validate(values: &[MeasurementValue]) -> Result<(), IngestError> {
    if values.is_empty() {
        return Err(IngestError::EmptyBatch);
    }
    for (index, v) in values.iter().enumerate() {
        if v.measurement.trim().is_empty() {
            return Err(IngestError::MissingMeasurement { index });
        }
        if !v.value.is_finite() {
            return Err(IngestError::NonFiniteValue {
                index,
                measurement: v.measurement.clone(),
            });
        }
    }
    Ok(())
}
