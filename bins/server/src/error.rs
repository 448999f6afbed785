#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("storage: {0}")]
    Store(#[from] sensor_api::StoreError),

    #[error("{0}")]
    Engine(#[from] sensor_engine::EngineError),

    #[error("api server: {0}")]
    Serve(std::io::Error),

    #[error("signal: {0}")]
    Signal(std::io::Error),
}
