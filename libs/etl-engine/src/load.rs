use std::sync::Arc;

use etl_api::{ErrorKind, EtlError, EventStore};

use crate::batch::Batch;
use crate::error::EngineError;
use crate::retry::{RetryPolicy, retry};

/// Writes batches into the analytical store.
///
/// Inserts retry on *any* error: blocking on an unreachable store stalls the
/// checkpoint, skipping a batch would lose data.
pub struct Loader {
    store: Arc<dyn EventStore>,
    policy: RetryPolicy,
}

impl Loader {
    pub fn new(store: Arc<dyn EventStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Create the target schema if absent. Transient failures are retried;
    /// an incompatible schema is fatal.
    pub async fn ensure_schema(&self) -> Result<(), EngineError> {
        retry(&self.policy, "ensure schema", |e: &EtlError| e.is_transient(), || {
            self.store.ensure_schema()
        })
        .await
        .map_err(|e| {
            let e = e.into_inner();
            match e.kind() {
                ErrorKind::Schema => EngineError::Schema(e),
                ErrorKind::Config => EngineError::Config(e.to_string()),
                _ => EngineError::Store(e),
            }
        })?;
        tracing::info!("target schema ready");
        Ok(())
    }

    /// Bulk-insert the batch. Returns only once the store acknowledged it,
    /// or with an error if a bounded policy ran out.
    pub async fn load(&self, batch: &Batch) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let events = batch.events();
        retry(&self.policy, "insert batch", |_: &EtlError| true, || self.store.insert(events))
            .await
            .map_err(|e| EngineError::Store(e.into_inner()))?;
        tracing::debug!(rows = events.len(), high_water = ?batch.high_water(), "batch loaded");
        Ok(())
    }
}
