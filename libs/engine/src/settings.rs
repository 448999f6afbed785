//! Live-tunable durations and their persisted form.
//!
//! Values are kept in the settings store as decimal seconds (`"60"`,
//! `"0.5"`) and mirrored into atomics so hot paths never wait on storage.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use sensor_api::{SettingItem, SettingsStore, duration_ms};

use crate::error::SettingsError;

pub const STORE_INTERVAL_KEY: &str = "store_interval";
pub const MAX_AGE_KEY: &str = "max_age";

/// Seeded into the settings store on startup when absent.
pub const DEFAULTS: &[(&str, &str)] = &[(STORE_INTERVAL_KEY, "60"), (MAX_AGE_KEY, "2678400")];

const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(31 * 24 * 3600);

pub fn default_value(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Parse decimal seconds. Rejects negatives, NaN and infinities.
pub fn parse_seconds(key: &str, value: &str) -> Result<Duration, SettingsError> {
    let invalid = |reason| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason,
    };
    let secs: f64 = value.trim().parse().map_err(|_| invalid("not a number"))?;
    if !secs.is_finite() {
        return Err(invalid("must be finite"));
    }
    if secs < 0.0 {
        return Err(invalid("must not be negative"));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid("out of range"))
}

/// Process-wide durations read by the ingest gate and the sweeper.
#[derive(Debug)]
pub struct Settings {
    store_interval_ms: AtomicI64,
    max_age_ms: AtomicI64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_INTERVAL, DEFAULT_MAX_AGE)
    }
}

impl Settings {
    pub fn new(store_interval: Duration, max_age: Duration) -> Self {
        Self {
            store_interval_ms: AtomicI64::new(duration_ms(store_interval)),
            max_age_ms: AtomicI64::new(duration_ms(max_age)),
        }
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_millis(self.store_interval_ms().max(0) as u64)
    }

    pub fn set_store_interval(&self, d: Duration) {
        self.store_interval_ms.store(duration_ms(d), Ordering::Relaxed);
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms().max(0) as u64)
    }

    pub fn set_max_age(&self, d: Duration) {
        self.max_age_ms.store(duration_ms(d), Ordering::Relaxed);
    }

    pub fn store_interval_ms(&self) -> i64 {
        self.store_interval_ms.load(Ordering::Relaxed)
    }

    pub fn max_age_ms(&self) -> i64 {
        self.max_age_ms.load(Ordering::Relaxed)
    }

    /// Validate `value` and apply it to the matching duration.
    pub fn apply(&self, key: &str, value: &str) -> Result<Duration, SettingsError> {
        let setter: fn(&Self, Duration) = match key {
            STORE_INTERVAL_KEY => Self::set_store_interval,
            MAX_AGE_KEY => Self::set_max_age,
            _ => return Err(SettingsError::UnknownKey(key.to_string())),
        };
        let d = parse_seconds(key, value)?;
        setter(self, d);
        Ok(d)
    }

    /// Seed missing defaults, then apply whatever the store holds.
    ///
    /// A stored value that does not parse is logged and the current value
    /// is kept, so a bad row never prevents startup.
    pub async fn load(&self, store: &dyn SettingsStore) -> Result<(), SettingsError> {
        store.ensure_defaults(DEFAULTS).await?;
        for item in store.settings().await? {
            if default_value(&item.key).is_none() {
                continue;
            }
            match self.apply(&item.key, &item.value) {
                Ok(d) => tracing::info!(key = %item.key, value_ms = duration_ms(d), "setting loaded"),
                Err(e) => tracing::warn!(key = %item.key, error = %e, "ignoring stored setting"),
            }
        }
        Ok(())
    }

    /// Validate, persist, then apply a new value.
    pub async fn update(
        &self,
        store: &dyn SettingsStore,
        key: &str,
        value: &str,
    ) -> Result<SettingItem, SettingsError> {
        if default_value(key).is_none() {
            return Err(SettingsError::UnknownKey(key.to_string()));
        }
        let value = value.trim();
        parse_seconds(key, value)?;
        let item = store.upsert_setting(key, value).await?;
        let d = self.apply(key, &item.value)?;
        tracing::info!(key, value_ms = duration_ms(d), "setting updated");
        Ok(item)
    }
}

/// Stored item for `key`, or its default when nothing was stored yet.
pub async fn lookup(store: &dyn SettingsStore, key: &str) -> Result<SettingItem, SettingsError> {
    if let Some(item) = store.setting(key).await? {
        return Ok(item);
    }
    match default_value(key) {
        Some(value) => Ok(SettingItem {
            key: key.to_string(),
            value: value.to_string(),
            updated_at_ms: 0,
        }),
        None => Err(SettingsError::UnknownKey(key.to_string())),
    }
}
