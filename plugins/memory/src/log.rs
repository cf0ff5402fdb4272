use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::Mutex;

use etl_api::{EtlError, LogClient, RawRecord, SeekTarget};

// ═══════════════════════════════════════════════════════════════
//  MemoryLog
// ═══════════════════════════════════════════════════════════════

/// Single-topic partitioned log held in memory.
///
/// Offsets are the index of a record inside its partition. `poll` returns
/// `None` as soon as every assigned partition is exhausted, without waiting
/// for the timeout.
pub struct MemoryLog {
    topic: String,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    partitions: Vec<Vec<RawRecord>>,
    /// Next offset to deliver, per partition.
    positions: Vec<usize>,
    assigned: Vec<i32>,
    seeks: Vec<(i32, SeekTarget)>,
    lookups: Vec<(i32, i64)>,
    connect_calls: u32,
    connect_failures: u32,
    connect_error: Option<EtlError>,
    poll_error: Option<EtlError>,
    delivered: usize,
    stall_after: Option<usize>,
}

impl MemoryLog {
    pub fn new(topic: impl Into<String>, partitions: i32) -> Self {
        let n = partitions.max(1) as usize;
        Self {
            topic: topic.into(),
            inner: Mutex::new(Inner {
                partitions: vec![Vec::new(); n],
                positions: vec![0; n],
                ..Inner::default()
            }),
        }
    }

    /// Append a record and return its offset. Unknown partitions are ignored
    /// and yield -1.
    pub async fn append(&self, partition: i32, key: Option<&[u8]>, value: Option<&[u8]>, event_time: i64) -> i64 {
        let mut inner = self.inner.lock().await;
        let Some(records) = usize::try_from(partition).ok().and_then(|p| inner.partitions.get_mut(p)) else {
            return -1;
        };
        let offset = records.len() as i64;
        records.push(RawRecord {
            topic: self.topic.clone(),
            partition,
            offset,
            key: key.map(<[u8]>::to_vec),
            value: value.map(<[u8]>::to_vec),
            event_time,
        });
        offset
    }

    /// Every seek issued so far, in order.
    pub async fn seeks(&self) -> Vec<(i32, SeekTarget)> {
        self.inner.lock().await.seeks.clone()
    }

    /// Every timestamp lookup issued so far, in order.
    pub async fn lookups(&self) -> Vec<(i32, i64)> {
        self.inner.lock().await.lookups.clone()
    }

    pub async fn assigned(&self) -> Vec<i32> {
        self.inner.lock().await.assigned.clone()
    }

    pub async fn connect_calls(&self) -> u32 {
        self.inner.lock().await.connect_calls
    }

    /// Fail the next `n` connects with a transient error.
    pub async fn fail_connects(&self, n: u32) {
        self.inner.lock().await.connect_failures = n;
    }

    /// Fail every connect with `err`.
    pub async fn fail_connect_with(&self, err: EtlError) {
        self.inner.lock().await.connect_error = Some(err);
    }

    /// Fail the next poll with `err`.
    pub async fn fail_next_poll(&self, err: EtlError) {
        self.inner.lock().await.poll_error = Some(err);
    }

    /// After `n` records in total have been delivered, `poll` never returns.
    pub async fn stall_after(&self, n: usize) {
        self.inner.lock().await.stall_after = Some(n);
    }
}

impl LogClient for MemoryLog {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.connect_calls += 1;
            if let Some(err) = &inner.connect_error {
                return Err(err.clone());
            }
            if inner.connect_failures > 0 {
                inner.connect_failures -= 1;
                return Err(EtlError::io("memory log: connection refused"));
            }
            Ok(())
        })
    }

    fn subscribe(&self, topic: &str) -> Pin<Box<dyn Future<Output = Result<Vec<i32>, EtlError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.assigned = if topic == self.topic {
                (0..inner.partitions.len() as i32).collect()
            } else {
                Vec::new()
            };
            Ok(inner.assigned.clone())
        })
    }

    fn offset_for_time(
        &self,
        partition: i32,
        ts_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<i64>, EtlError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.lookups.push((partition, ts_ms));
            let records = usize::try_from(partition)
                .ok()
                .and_then(|p| inner.partitions.get(p))
                .ok_or_else(|| EtlError::logic(format!("memory log: unknown partition {partition}")))?;
            Ok(records.iter().find(|r| r.event_time >= ts_ms).map(|r| r.offset))
        })
    }

    fn seek(&self, partition: i32, target: SeekTarget) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if !inner.assigned.contains(&partition) {
                return Err(EtlError::logic(format!("memory log: partition {partition} is not assigned")));
            }
            inner.seeks.push((partition, target));
            let p = partition as usize;
            let position = match target {
                SeekTarget::Offset(offset) => offset.max(0) as usize,
                SeekTarget::End => inner.partitions[p].len(),
            };
            inner.positions[p] = position;
            Ok(())
        })
    }

    fn poll(&self, _timeout: Duration) -> Pin<Box<dyn Future<Output = Result<Option<RawRecord>, EtlError>> + Send + '_>> {
        Box::pin(async move {
            let stalled = {
                let mut inner = self.inner.lock().await;
                if let Some(err) = inner.poll_error.take() {
                    return Err(err);
                }
                inner.stall_after.is_some_and(|n| inner.delivered >= n)
            };
            if stalled {
                std::future::pending::<()>().await;
            }

            let mut inner = self.inner.lock().await;
            let Inner { partitions, positions, assigned, delivered, .. } = &mut *inner;
            for &p in assigned.iter() {
                let p = p as usize;
                if let Some(record) = partitions[p].get(positions[p]) {
                    positions[p] += 1;
                    *delivered += 1;
                    return Ok(Some(record.clone()));
                }
            }
            Ok(None)
        })
    }

    fn unsubscribe(&self) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        Box::pin(async move {
            self.inner.lock().await.assigned.clear();
            Ok(())
        })
    }
}
