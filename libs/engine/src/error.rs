use sensor_api::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage: {0}")]
    Store(#[from] StoreError),

    #[error("broker is not running")]
    BrokerClosed,

    #[error("settings: {0}")]
    Settings(#[from] SettingsError),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Store`, context goes into the inner `StoreError` so its kind is
    /// preserved. `Config` gets the context prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Store(e) => EngineError::Store(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

/// Rejections of an ingest call. `Store` is an internal failure, the rest
/// are caller mistakes.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("batch has no values")]
    EmptyBatch,

    #[error("value #{index} has an empty measurement name")]
    MissingMeasurement { index: usize },

    #[error("value #{index} ('{measurement}') is not a finite number")]
    NonFiniteValue { index: usize, measurement: String },

    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn is_validation(&self) -> bool {
        !matches!(self, IngestError::Store(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("cursor is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("cursor payload is malformed: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("bad cursor: {0}")]
    Cursor(#[from] CursorError),

    #[error("storage: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("delete failed after {deleted} rows: {source}")]
    Delete { deleted: u64, source: StoreError },
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("unknown setting '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: &'static str,
    },

    #[error("storage: {0}")]
    Store(#[from] StoreError),
}
