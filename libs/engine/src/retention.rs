use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use sensor_api::MeasurementStore;

use crate::clock::Clock;
use crate::error::SweepError;
use crate::settings::Settings;

fn default_sweep_interval_ms() -> u64 {
    15_000
}

fn default_batch_size() -> usize {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Rows removed per delete statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

/// Periodically deletes rows whose event time is older than `max_age`.
pub struct Sweeper {
    store: Arc<dyn MeasurementStore>,
    settings: Arc<Settings>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: usize,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn MeasurementStore>,
        settings: Arc<Settings>,
        clock: Arc<dyn Clock>,
        config: &RetentionConfig,
    ) -> Self {
        Self {
            store,
            settings,
            clock,
            interval: Duration::from_millis(config.sweep_interval_ms.max(1)),
            batch_size: config.batch_size.max(1),
        }
    }

    /// One pass: delete in batches until nothing older than the cutoff is
    /// left. Returns the number of rows removed.
    pub async fn sweep_once(&self) -> Result<u64, SweepError> {
        let cutoff_ms = self.clock.now_ms().saturating_sub(self.settings.max_age_ms());
        let mut deleted = 0u64;
        loop {
            let n = self
                .store
                .delete_oldest_batch(cutoff_ms, self.batch_size)
                .await
                .map_err(|source| SweepError::Delete { deleted, source })?;
            if n == 0 {
                break;
            }
            deleted += n;
        }
        Ok(deleted)
    }

    /// Run on a fixed timer until `token` is cancelled. A failed pass is
    /// logged and retried on the next tick.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_ms = self.interval.as_millis() as u64,
                batch_size = self.batch_size,
                "retention sweeper started"
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => match self.sweep_once().await {
                        Ok(0) => tracing::trace!("retention sweep: nothing to delete"),
                        Ok(n) => tracing::info!(deleted = n, "retention sweep"),
                        Err(e) => tracing::error!(error = %e, "retention sweep failed"),
                    },
                }
            }
            tracing::info!("retention sweeper stopped");
        })
    }
}
