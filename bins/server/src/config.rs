use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use sensor_api_server::StreamConfig;
use sensor_engine::EngineConfig;
use storage_memory::MemoryStorageConfig;
use storage_sqlite::SqliteStorageConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "sensor-server", version, about = "Live sensor measurement service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP/WebSocket server
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file. Defaults apply when absent.
    #[arg(long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides `api_port`).
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// SQLite database file (overrides `storage.sqlite.path`).
    #[arg(long, env = "DB_PATH")]
    pub db: Option<PathBuf>,

    /// Deployment environment, reported at startup.
    #[arg(long, default_value = "development", env = "APP_ENV")]
    pub env: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// How long shutdown waits for background tasks before aborting them.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

fn default_api_port() -> u16 {
    4001
}
fn default_drain_timeout_ms() -> u64 {
    3_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            drain_timeout_ms: default_drain_timeout_ms(),
            storage: StorageConfig::default(),
            stream: StreamConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub sqlite: SqliteStorageConfig,
    #[serde(default)]
    pub memory: MemoryStorageConfig,
}

impl ServerConfig {
    /// Read `path` if given. A missing file falls back to defaults; a file
    /// that exists but does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ServerError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(config = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ServerError::Config {
                    context: "read",
                    detail: format!("'{}': {e}", path.display()),
                });
            }
        };
        Self::parse(&content).map_err(|e| match e {
            ServerError::Config { context, detail } => ServerError::Config {
                context,
                detail: format!("'{}': {detail}", path.display()),
            },
            other => other,
        })
    }

    pub fn parse(toml_str: &str) -> Result<Self, ServerError> {
        toml::from_str(toml_str).map_err(|e| ServerError::Config {
            context: "parse",
            detail: e.to_string(),
        })
    }

    /// Command-line flags win over the file.
    pub fn apply_args(&mut self, args: &ServeArgs) {
        if let Some(port) = args.port {
            self.api_port = port;
        }
        if let Some(ref db) = args.db {
            self.storage.sqlite.path = db.clone();
        }
    }
}
