use serde::Deserialize;

use crate::broker::BrokerConfig;
use crate::error::EngineError;
use crate::gate::ThrottleScope;
use crate::retention::RetentionConfig;

/// Engine section of the service configuration.
///
/// ```toml
/// [ingest]
/// throttle = "per_sensor"
///
/// [broker]
/// subscriber_buffer = 32
/// publish_timeout_ms = 250
///
/// [retention]
/// sweep_interval_ms = 15000
/// batch_size = 500
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub throttle: ThrottleScope,
}

impl EngineConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }
}
