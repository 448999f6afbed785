use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sensor_api::{MeasurementStore, SettingsStore};

use crate::broker::Broker;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ingest::Ingestor;
use crate::retention::Sweeper;
use crate::settings::Settings;

/// The running pipeline: broker loop, retention sweeper, and the shared
/// state request handlers need.
pub struct Engine {
    ingestor: Arc<Ingestor>,
    broker: Broker,
    settings: Arc<Settings>,
    store: Arc<dyn MeasurementStore>,
    settings_store: Arc<dyn SettingsStore>,
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("broker", &self.broker)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Prepare storage, load settings, start the background tasks.
    ///
    /// Settings are applied before this returns, so the first request
    /// already sees the persisted store interval.
    pub async fn bootstrap(
        config: &EngineConfig,
        store: Arc<dyn MeasurementStore>,
        settings_store: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
        token: CancellationToken,
    ) -> Result<Self, EngineError> {
        store.init().await.map_err(|e| EngineError::from(e).with_context("init storage"))?;

        let settings = Arc::new(Settings::default());
        settings.load(settings_store.as_ref()).await?;

        let (broker, broker_task) = Broker::spawn(&config.broker, token.child_token());

        let sweeper = Sweeper::new(store.clone(), settings.clone(), clock.clone(), &config.retention);
        let sweeper_task = sweeper.spawn(token.child_token());

        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            broker.clone(),
            settings.clone(),
            clock,
            config.ingest.throttle,
        ));

        tracing::info!(
            throttle = ?config.ingest.throttle,
            store_interval_ms = settings.store_interval_ms(),
            max_age_ms = settings.max_age_ms(),
            "engine started"
        );

        Ok(Engine {
            ingestor,
            broker,
            settings,
            store,
            settings_store,
            token,
            tasks: vec![("broker", broker_task), ("sweeper", sweeper_task)],
        })
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn MeasurementStore> {
        &self.store
    }

    pub fn settings_store(&self) -> &Arc<dyn SettingsStore> {
        &self.settings_store
    }

    /// Cancel the background tasks and wait up to `drain` for each of
    /// them; whatever is still running afterwards is aborted.
    pub async fn shutdown(self, drain: Duration) {
        self.token.cancel();
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(drain, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "task finished"),
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "task failed"),
                Err(_) => {
                    tracing::warn!(task = name, "task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        tracing::info!("engine shut down");
    }
}
