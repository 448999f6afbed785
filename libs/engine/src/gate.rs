use std::collections::HashMap;
use std::sync::Mutex;

use serde::Deserialize;

use sensor_api::TopicKey;

/// Which batches share one store-interval window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleScope {
    /// One window per sensor id; readings without an id share one window.
    #[default]
    PerSensor,
    /// One window for the whole process.
    Global,
}

/// Map size that triggers the first sweep of elapsed windows.
const PRUNE_FLOOR: usize = 1024;

#[derive(Debug)]
struct Windows {
    last_persist_ms: HashMap<TopicKey, i64>,
    prune_at: usize,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            last_persist_ms: HashMap::new(),
            prune_at: PRUNE_FLOOR,
        }
    }
}

/// Store-interval gate.
///
/// Remembers when each window last let a batch through. The lock is held
/// for the compare-and-set only, never across a storage call, so two
/// concurrent batches in the same window cannot both be persisted.
///
/// Windows that have already elapsed are dropped once the map doubles in
/// size, so client-chosen sensor ids cannot grow it without bound.
#[derive(Debug, Default)]
pub struct StoreGate {
    scope: ThrottleScope,
    windows: Mutex<Windows>,
}

impl StoreGate {
    pub fn new(scope: ThrottleScope) -> Self {
        Self {
            scope,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Claim the window for `key` at `now_ms`.
    ///
    /// Returns true and records `now_ms` when at least `interval_ms` has
    /// passed since the last claim (or there was none).
    pub fn try_acquire(&self, key: &TopicKey, now_ms: i64, interval_ms: i64) -> bool {
        let slot = match self.scope {
            ThrottleScope::PerSensor => key.clone(),
            ThrottleScope::Global => TopicKey::All,
        };
        let mut windows = match self.windows.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("store gate lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if let Some(&prev) = windows.last_persist_ms.get(&slot) {
            if now_ms.saturating_sub(prev) < interval_ms {
                return false;
            }
        }
        windows.last_persist_ms.insert(slot, now_ms);

        if windows.last_persist_ms.len() >= windows.prune_at {
            let before = windows.last_persist_ms.len();
            windows
                .last_persist_ms
                .retain(|_, &mut t| now_ms.saturating_sub(t) < interval_ms);
            let after = windows.last_persist_ms.len();
            windows.prune_at = (after * 2).max(PRUNE_FLOOR);
            tracing::debug!(before, after, "store gate pruned elapsed windows");
        }
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        match self.windows.lock() {
            Ok(g) => g.last_persist_ms.len(),
            Err(poisoned) => poisoned.into_inner().last_persist_ms.len(),
        }
    }
}
