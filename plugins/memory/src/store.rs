use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use etl_api::{DomainEvent, EtlError, EventStore};

/// Analytical store stand-in. Rows from a failed insert are never kept.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    rows: Vec<DomainEvent>,
    schema_ready: bool,
    schema_conflict: Option<String>,
    ensure_calls: u32,
    ensure_failures: u32,
    insert_calls: u32,
    insert_failures: u32,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self) -> Vec<DomainEvent> {
        self.inner.read().await.rows.clone()
    }

    pub async fn schema_ready(&self) -> bool {
        self.inner.read().await.schema_ready
    }

    pub async fn ensure_calls(&self) -> u32 {
        self.inner.read().await.ensure_calls
    }

    /// Insert attempts, failed ones included.
    pub async fn insert_calls(&self) -> u32 {
        self.inner.read().await.insert_calls
    }

    /// Pretend an incompatible table already exists.
    pub async fn reject_schema(&self, reason: impl Into<String>) {
        self.inner.write().await.schema_conflict = Some(reason.into());
    }

    /// Fail the next `n` schema checks with a transient error.
    pub async fn fail_ensure(&self, n: u32) {
        self.inner.write().await.ensure_failures = n;
    }

    /// Fail the next `n` inserts with a transient error.
    pub async fn fail_inserts(&self, n: u32) {
        self.inner.write().await.insert_failures = n;
    }
}

impl EventStore for MemoryEventStore {
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            inner.ensure_calls += 1;
            if let Some(reason) = &inner.schema_conflict {
                return Err(EtlError::schema(format!("memory store: {reason}")));
            }
            if inner.ensure_failures > 0 {
                inner.ensure_failures -= 1;
                return Err(EtlError::io("memory store: unavailable"));
            }
            inner.schema_ready = true;
            Ok(())
        })
    }

    fn insert(&self, events: &[DomainEvent]) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        let events = events.to_vec();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            inner.insert_calls += 1;
            if inner.insert_failures > 0 {
                inner.insert_failures -= 1;
                return Err(EtlError::io("memory store: insert timed out"));
            }
            inner.rows.extend(events);
            Ok(())
        })
    }
}
