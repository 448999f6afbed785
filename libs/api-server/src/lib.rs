//! HTTP + WebSocket front of the measurement pipeline.

pub mod error;
mod http;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use sensor_api::{MeasurementStore, SettingsStore};
use sensor_engine::{Broker, Engine, Ingestor, Settings};

pub use error::ApiError;

fn default_heartbeat_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Interval between WebSocket pings on an idle stream.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

impl StreamConfig {
    fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }
}

#[derive(Clone)]
pub struct AppState {
    ingestor: Arc<Ingestor>,
    broker: Broker,
    settings: Arc<Settings>,
    store: Arc<dyn MeasurementStore>,
    settings_store: Arc<dyn SettingsStore>,
    stream: StreamConfig,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn from_engine(engine: &Engine, stream: StreamConfig, shutdown: CancellationToken) -> Self {
        Self {
            ingestor: engine.ingestor().clone(),
            broker: engine.broker().clone(),
            settings: engine.settings().clone(),
            store: engine.store().clone(),
            settings_store: engine.settings_store().clone(),
            stream,
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handle_health))
        .route(
            "/api/measurements",
            get(http::handle_list_measurements).post(http::handle_create_measurements),
        )
        .route("/api/measurements/stream", get(ws::handle_stream))
        .route("/api/sensors", get(http::handle_list_sensors))
        .route("/api/settings", get(http::handle_list_settings))
        .route(
            "/api/settings/{key}",
            get(http::handle_get_setting).put(http::handle_put_setting),
        )
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then let in-flight requests finish.
pub async fn run(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "api server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
