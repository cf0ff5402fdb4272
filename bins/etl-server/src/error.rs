#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Engine(#[from] etl_engine::EngineError),

    #[error("plugin: {0}")]
    Plugin(#[from] etl_api::EtlError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),

    #[error("pipeline task: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("aborted by second shutdown signal")]
    Aborted,
}
