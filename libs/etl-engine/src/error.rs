use etl_api::EtlError;

/// Conditions that stop the pipeline. Everything recoverable is retried
/// or logged below this level and never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    /// Target store rejected the DDL for a non-transient reason.
    #[error("schema error: {0}")]
    Schema(EtlError),

    #[error("checkpoint write for '{key}' failed after {attempts} attempts: {source}")]
    CheckpointWriteExhausted {
        key: String,
        attempts: u32,
        source: EtlError,
    },

    #[error("checkpoint '{key}' is unreadable: {source}")]
    CorruptCheckpoint { key: String, source: EtlError },

    #[error("store error: {0}")]
    Store(EtlError),
}
