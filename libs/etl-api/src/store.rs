use std::future::Future;
use std::pin::Pin;

use crate::error::EtlError;
use crate::record::DomainEvent;

/// Columnar analytical store receiving DomainEvents.
///
/// Implementations: ClickHouse (`storage-clickhouse`), in-memory (`etl-memory`).
pub trait EventStore: Send + Sync {
    /// Create database/table if absent. Must be safe to call on every start.
    ///
    /// Errors of kind `Schema` mean the existing schema is incompatible.
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>>;

    /// Write all events as one bulk insert. On error nothing is assumed
    /// to be written.
    fn insert(
        &self,
        events: &[DomainEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>>;
}
