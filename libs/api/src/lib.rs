//! Shared types and storage contracts of the sensor measurement pipeline.
//!
//! The engine, the storage backends and the API server depend on this crate
//! only; it carries no runtime of its own.

pub mod error;
pub mod store;
pub mod types;
pub mod util;

pub use error::{ErrorKind, StoreError};
pub use store::{MeasurementStore, SettingsStore};
pub use types::{
    MeasurementEvent, MeasurementRecord, MeasurementValue, NewMeasurement, PageKey, PageQuery,
    SensorSummary, SettingItem, TopicKey,
};
pub use util::{duration_ms, now_ms, truncate_to_second};
