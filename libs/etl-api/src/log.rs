use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::EtlError;
use crate::record::RawRecord;

/// Where to position a partition before streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    /// Absolute offset of the next record to deliver.
    Offset(i64),
    /// Past the last record currently in the partition.
    End,
}

/// Consumer side of an append-only partitioned log.
///
/// The extractor drives an implementation through
/// connect → subscribe → offset_for_time/seek → poll. Partition assignment
/// comes from the log's own consumer-group protocol, so two instances never
/// see the same partition.
///
/// Implementations: Kafka (`log-kafka`), in-memory (`etl-memory`).
pub trait LogClient: Send + Sync {
    /// Establish the broker connection. Idempotent.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>>;

    /// Subscribe to a single topic and wait for the partition assignment.
    /// Returns the assigned partition numbers (possibly empty).
    fn subscribe(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<i32>, EtlError>> + Send + '_>>;

    /// Earliest offset in `partition` whose timestamp is `>= ts_ms`.
    /// `None` if no such record exists yet.
    fn offset_for_time(
        &self,
        partition: i32,
        ts_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<i64>, EtlError>> + Send + '_>>;

    /// Reposition an assigned partition.
    fn seek(
        &self,
        partition: i32,
        target: SeekTarget,
    ) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>>;

    /// Next record from any assigned partition. `Ok(None)` means nothing
    /// arrived within `timeout`.
    fn poll(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<RawRecord>, EtlError>> + Send + '_>>;

    /// Leave the consumer group.
    fn unsubscribe(&self) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>>;
}
