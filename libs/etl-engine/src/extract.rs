use std::sync::Arc;
use std::time::Duration;

use etl_api::{ErrorKind, EtlError, LogClient, RawRecord, SeekTarget};

use crate::error::EngineError;
use crate::retry::{RetryPolicy, retry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    Disconnected,
    Subscribing,
    Seeking,
    Streaming,
    Drained,
}

/// Pulls raw records from the log, resuming after a checkpoint.
///
/// Holds no checkpoint state: every `extract` call re-seeks all assigned
/// partitions from the `resume_after` it is given, so a repeated call with
/// the same value yields the same records or more.
pub struct Extractor {
    client: Arc<dyn LogClient>,
    topic: String,
    idle_timeout: Duration,
    policy: RetryPolicy,
    state: ExtractorState,
    connected: bool,
}

impl Extractor {
    pub fn new(
        client: Arc<dyn LogClient>,
        topic: impl Into<String>,
        idle_timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            topic: topic.into(),
            idle_timeout,
            policy,
            state: ExtractorState::Disconnected,
            connected: false,
        }
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    fn transition(&mut self, next: ExtractorState) {
        if self.state != next {
            tracing::debug!(topic = %self.topic, from = ?self.state, to = ?next, "extractor state");
            self.state = next;
        }
    }

    /// Start a cycle: connect if needed, refresh the assignment and seek each
    /// partition to the first record with `event_time > resume_after`.
    ///
    /// Transient failures are retried per policy. A configuration error is
    /// returned; any other failure yields an already drained extraction.
    pub async fn extract(&mut self, resume_after: i64) -> Result<Extraction<'_>, EngineError> {
        match self.position(resume_after).await {
            Ok(()) => self.transition(ExtractorState::Streaming),
            Err(e) if e.kind() == ErrorKind::Config => {
                return Err(EngineError::Config(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "extraction skipped for this cycle");
                self.transition(ExtractorState::Drained);
            }
        }
        Ok(Extraction { extractor: self, yielded: 0 })
    }

    async fn position(&mut self, resume_after: i64) -> Result<(), EtlError> {
        let client = self.client.clone();
        let policy = self.policy;
        let transient = |e: &EtlError| e.is_transient();

        if !self.connected {
            retry(&policy, "log connect", transient, || client.connect())
                .await
                .map_err(|e| e.into_inner())?;
            self.connected = true;
            tracing::info!(topic = %self.topic, "connected to log");
        }

        self.transition(ExtractorState::Subscribing);
        let topic = self.topic.clone();
        let partitions = retry(&policy, "log subscribe", transient, || client.subscribe(&topic))
            .await
            .map_err(|e| e.into_inner())?;
        if partitions.is_empty() {
            tracing::info!(topic = %self.topic, "no partitions assigned");
        }

        self.transition(ExtractorState::Seeking);
        let from_ts = resume_after.saturating_add(1);
        for partition in partitions {
            let offset = retry(&policy, "log offset lookup", transient, || {
                client.offset_for_time(partition, from_ts)
            })
            .await
            .map_err(|e| e.into_inner().with_context(format!("partition {partition}")))?;

            let target = match offset {
                Some(offset) => SeekTarget::Offset(offset),
                None => SeekTarget::End,
            };
            retry(&policy, "log seek", transient, || client.seek(partition, target))
                .await
                .map_err(|e| e.into_inner().with_context(format!("partition {partition}")))?;
            tracing::debug!(topic = %self.topic, partition, from_ts, ?target, "partition positioned");
        }
        Ok(())
    }

    /// Leave the consumer group. Errors are logged only.
    pub async fn close(&mut self) {
        if !self.connected {
            return;
        }
        if let Err(e) = self.client.unsubscribe().await {
            tracing::warn!(topic = %self.topic, error = %e, "unsubscribe failed");
        }
        self.transition(ExtractorState::Drained);
    }
}

/// Lazy, finite sequence of records for one cycle.
///
/// Ends when no record arrives within the idle timeout, or when the log
/// reports a non-transient error (the stream is then abandoned until the
/// next cycle).
pub struct Extraction<'a> {
    extractor: &'a mut Extractor,
    yielded: u64,
}

impl Extraction<'_> {
    pub async fn next(&mut self) -> Option<RawRecord> {
        if self.extractor.state != ExtractorState::Streaming {
            return None;
        }
        let client = self.extractor.client.clone();
        let idle = self.extractor.idle_timeout;
        let polled = retry(
            &self.extractor.policy,
            "log poll",
            |e: &EtlError| e.is_transient(),
            || client.poll(idle),
        )
        .await;

        match polled {
            Ok(Some(record)) => {
                self.yielded += 1;
                Some(record)
            }
            Ok(None) => {
                tracing::debug!(topic = %self.extractor.topic, yielded = self.yielded, "idle timeout, drained");
                self.extractor.transition(ExtractorState::Drained);
                None
            }
            Err(e) => {
                tracing::error!(
                    topic = %self.extractor.topic,
                    error = %e,
                    "log read failed, abandoning stream for this cycle"
                );
                self.extractor.transition(ExtractorState::Drained);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use etl_memory::MemoryLog;

    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy::unbounded().with_base_delay_ms(1).with_max_delay_ms(2)
    }

    async fn drain(extraction: &mut Extraction<'_>) -> Vec<RawRecord> {
        let mut out = Vec::new();
        while let Some(r) = extraction.next().await {
            out.push(r);
        }
        out
    }

    #[tokio::test]
    async fn yields_only_records_after_resume_point() {
        let log = Arc::new(MemoryLog::new("views", 1));
        log.append(0, None, None, 100).await;
        log.append(0, None, None, 200).await;
        log.append(0, None, None, 300).await;

        let mut ex = Extractor::new(log.clone(), "views", Duration::from_millis(5), fast());
        let mut extraction = ex.extract(200).await.unwrap();
        let records = drain(&mut extraction).await;
        assert_eq!(records.iter().map(|r| r.event_time).collect::<Vec<_>>(), vec![300]);
        assert_eq!(ex.state(), ExtractorState::Drained);
    }

    #[tokio::test]
    async fn seeks_to_offset_after_checkpoint_not_at_it() {
        let log = Arc::new(MemoryLog::new("views", 2));
        log.append(0, None, None, 1_700_000_000_000).await;
        log.append(0, None, None, 1_700_000_000_001).await;
        log.append(1, None, None, 1_699_999_999_999).await;

        let mut ex = Extractor::new(log.clone(), "views", Duration::from_millis(5), fast());
        let _ = ex.extract(1_700_000_000_000).await.unwrap();
        let seeks = log.seeks().await;
        assert_eq!(seeks, vec![(0, SeekTarget::Offset(1)), (1, SeekTarget::End)]);
        let lookups = log.lookups().await;
        assert!(lookups.iter().all(|&(_, ts)| ts == 1_700_000_000_001));
    }

    #[tokio::test]
    async fn restart_reproduces_same_records() {
        let log = Arc::new(MemoryLog::new("views", 1));
        log.append(0, None, None, 10).await;
        log.append(0, None, None, 20).await;

        let mut ex = Extractor::new(log.clone(), "views", Duration::from_millis(5), fast());
        let first = drain(&mut ex.extract(0).await.unwrap()).await;
        log.append(0, None, None, 30).await;
        let second = drain(&mut ex.extract(0).await.unwrap()).await;
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 3);
        assert_eq!(&second[..2], &first[..]);
    }

    #[tokio::test]
    async fn connection_failures_are_retried() {
        let log = Arc::new(MemoryLog::new("views", 1));
        log.fail_connects(3).await;
        log.append(0, None, None, 10).await;

        let mut ex = Extractor::new(log.clone(), "views", Duration::from_millis(5), fast());
        let records = drain(&mut ex.extract(0).await.unwrap()).await;
        assert_eq!(records.len(), 1);
        assert_eq!(log.connect_calls().await, 4);
    }

    #[tokio::test]
    async fn decode_failure_abandons_stream_for_cycle() {
        let log = Arc::new(MemoryLog::new("views", 1));
        log.append(0, None, None, 10).await;
        log.append(0, None, None, 20).await;
        log.fail_next_poll(EtlError::format("corrupt record batch")).await;

        let mut ex = Extractor::new(log.clone(), "views", Duration::from_millis(5), fast());
        let records = drain(&mut ex.extract(0).await.unwrap()).await;
        assert!(records.is_empty());
        assert_eq!(ex.state(), ExtractorState::Drained);

        let records = drain(&mut ex.extract(0).await.unwrap()).await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn transient_poll_failure_is_retried() {
        let log = Arc::new(MemoryLog::new("views", 1));
        log.append(0, None, None, 10).await;
        log.fail_next_poll(EtlError::io("broker connection reset")).await;

        let mut ex = Extractor::new(log.clone(), "views", Duration::from_millis(5), fast());
        let records = drain(&mut ex.extract(0).await.unwrap()).await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn config_error_is_returned() {
        let log = Arc::new(MemoryLog::new("views", 1));
        log.fail_connect_with(EtlError::config("bootstrap.servers is empty")).await;
        let mut ex = Extractor::new(log.clone(), "views", Duration::from_millis(5), fast());
        assert!(matches!(ex.extract(0).await, Err(EngineError::Config(_))));
        assert_eq!(ex.state(), ExtractorState::Disconnected);
    }

    #[tokio::test]
    async fn unknown_topic_yields_nothing() {
        let log = Arc::new(MemoryLog::new("views", 1));
        log.append(0, None, None, 10).await;
        let mut ex = Extractor::new(log.clone(), "events", Duration::from_millis(5), fast());
        let records = drain(&mut ex.extract(0).await.unwrap()).await;
        assert!(records.is_empty());
    }
}
