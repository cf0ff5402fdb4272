use std::future::Future;
use std::pin::Pin;

use crate::error::EtlError;

/// Key under which a pipeline's checkpoint is stored.
pub fn checkpoint_key(pipeline_id: &str) -> String {
    format!("last_processed_timestamp:{pipeline_id}")
}

/// Durable key/value service holding integer checkpoints.
///
/// Implementations: Redis (`checkpoint-redis`), in-memory (`etl-memory`).
pub trait CheckpointBackend: Send + Sync {
    /// Stored integer, `None` when the key is absent.
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<i64>, EtlError>> + Send + '_>>;

    fn set(
        &self,
        key: &str,
        value: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>>;
}
