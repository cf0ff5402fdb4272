use std::sync::Arc;

use etl_api::{CheckpointBackend, ErrorKind, EtlError, checkpoint_key};

use crate::error::EngineError;
use crate::retry::{RetryError, RetryPolicy, retry};

/// Durable checkpoint access for one pipeline identity.
///
/// Reads retry transient failures forever. Writes follow `write_policy`;
/// running out of attempts is fatal for the caller.
pub struct CheckpointStore {
    backend: Arc<dyn CheckpointBackend>,
    read_policy: RetryPolicy,
    write_policy: RetryPolicy,
}

impl CheckpointStore {
    pub fn new(backend: Arc<dyn CheckpointBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            read_policy: policy.unlimited(),
            write_policy: policy,
        }
    }

    /// Last persisted event time, 0 if the pipeline never checkpointed.
    pub async fn get(&self, pipeline_id: &str) -> Result<i64, EngineError> {
        let key = checkpoint_key(pipeline_id);
        let result = retry(&self.read_policy, "checkpoint get", |e: &EtlError| e.is_transient(), || {
            self.backend.get(&key)
        })
        .await;

        match result {
            Ok(value) => Ok(value.unwrap_or(0)),
            Err(e) => {
                let source = e.into_inner();
                match source.kind() {
                    ErrorKind::Config => Err(EngineError::Config(source.to_string())),
                    _ => Err(EngineError::CorruptCheckpoint { key, source }),
                }
            }
        }
    }

    pub async fn set(&self, pipeline_id: &str, event_time: i64) -> Result<(), EngineError> {
        let key = checkpoint_key(pipeline_id);
        let result = retry(&self.write_policy, "checkpoint set", |e: &EtlError| e.is_transient(), || {
            self.backend.set(&key, event_time)
        })
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(%key, event_time, "checkpoint persisted");
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(EngineError::CheckpointWriteExhausted {
                key,
                attempts,
                source: last,
            }),
            Err(RetryError::Aborted(source)) => Err(EngineError::CheckpointWriteExhausted {
                key,
                attempts: 1,
                source,
            }),
        }
    }
}
