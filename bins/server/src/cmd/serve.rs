use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use sensor_api::{MeasurementStore, SettingsStore};
use sensor_api_server::AppState;
use sensor_engine::{Engine, SystemClock};
use storage_memory::MemoryStorage;
use storage_sqlite::SqliteStorage;

use crate::config::{ServeArgs, ServerConfig, StorageBackend};
use crate::error::ServerError;

type Stores = (Arc<dyn MeasurementStore>, Arc<dyn SettingsStore>);

fn open_storage(config: &ServerConfig) -> Result<Stores, ServerError> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let sqlite = Arc::new(SqliteStorage::open(&config.storage.sqlite)?);
            tracing::info!(path = %config.storage.sqlite.path.display(), "opened sqlite storage");
            let store: Arc<dyn MeasurementStore> = sqlite.clone();
            let settings_store: Arc<dyn SettingsStore> = sqlite;
            Ok((store, settings_store))
        }
        StorageBackend::Memory => {
            let memory = Arc::new(MemoryStorage::from_config(&config.storage.memory));
            tracing::info!(max_records = config.storage.memory.max_records, "using in-memory storage");
            let store: Arc<dyn MeasurementStore> = memory.clone();
            let settings_store: Arc<dyn SettingsStore> = memory;
            Ok((store, settings_store))
        }
    }
}

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!(env = %args.env, version = env!("CARGO_PKG_VERSION"), "sensor-server starting");

    // --- Load config ---
    let mut config = ServerConfig::load(args.config.as_deref())?;
    config.apply_args(&args);
    if let Some(ref path) = args.config {
        tracing::info!(config = %path.display(), "loaded config");
    }

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Storage + engine ---
    let (store, settings_store) = open_storage(&config)?;
    let engine = Engine::bootstrap(
        &config.engine,
        store,
        settings_store,
        Arc::new(SystemClock),
        token.clone(),
    )
    .await?;

    // --- API server (HTTP + WS) ---
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let state = AppState::from_engine(&engine, config.stream.clone(), token.clone());
    let api_token = token.clone();
    let mut api_handle = tokio::spawn(async move { sensor_api_server::run(addr, state, api_token).await });

    tracing::info!(env = %args.env, port = config.api_port, "server ready");

    // --- Wait for a signal, or for the API server to die on its own ---
    let early_exit = wait_for_stop(shutdown_signal(), &mut api_handle).await;

    // Signal all tasks to stop cooperatively
    token.cancel();

    let drain = Duration::from_millis(config.drain_timeout_ms);
    let api_result = match early_exit {
        Some(res) => res,
        None => match tokio::time::timeout(drain, &mut api_handle).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!("api server did not drain in time, aborting");
                api_handle.abort();
                Ok(Ok(()))
            }
        },
    };

    engine.shutdown(drain).await;

    match api_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ServerError::Serve(e)),
        Err(e) => tracing::error!(error = %e, "api server task failed"),
    }

    tracing::info!("shutdown complete");
    Ok(())
}

type ApiTask = JoinHandle<std::io::Result<()>>;

/// Wait for `signal` or for the API task to end first. A broken signal
/// handler still leads to a normal shutdown, so it only gets logged.
/// Returns the API task's result when it ended on its own.
async fn wait_for_stop<F>(signal: F, api_handle: &mut ApiTask) -> Option<Result<std::io::Result<()>, JoinError>>
where
    F: Future<Output = Result<(), ServerError>>,
{
    tokio::select! {
        signal = signal => {
            match signal {
                Ok(()) => tracing::info!("shutting down..."),
                Err(e) => tracing::error!(error = %e, "signal handler failed, shutting down"),
            }
            None
        }
        res = api_handle => Some(res),
    }
}

/// Ctrl+C everywhere, SIGTERM on unix.
async fn shutdown_signal() -> Result<(), ServerError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).map_err(ServerError::Signal)?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map_err(ServerError::Signal),
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map_err(ServerError::Signal)
    }
}
