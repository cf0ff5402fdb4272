use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use serde::Deserialize;
use tokio::sync::Mutex;

use etl_api::{EtlError, LogClient, RawRecord, SeekTarget};

// ════════════════════════════════════════════════════════════════
//  Config
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` list.
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Where a partition without committed offsets starts. Offsets are never
    /// committed, but every partition is repositioned explicitly anyway.
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// How long `subscribe` waits for the group to hand out partitions.
    #[serde(default = "default_assignment_timeout_ms")]
    pub assignment_timeout_ms: u64,
    /// Timeout for offset lookups and seeks.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_bootstrap_servers() -> String {
    "kafka-node1:9092".into()
}
fn default_group_id() -> String {
    "etl-views".into()
}
fn default_auto_offset_reset() -> String {
    "earliest".into()
}
fn default_assignment_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    5_000
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: default_bootstrap_servers(),
            group_id: default_group_id(),
            auto_offset_reset: default_auto_offset_reset(),
            assignment_timeout_ms: default_assignment_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<(), EtlError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(EtlError::config("kafka.bootstrap_servers is empty"));
        }
        if self.group_id.trim().is_empty() {
            return Err(EtlError::config("kafka.group_id is empty"));
        }
        if !matches!(self.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(EtlError::config(format!(
                "kafka.auto_offset_reset must be 'earliest' or 'latest', got '{}'",
                self.auto_offset_reset
            )));
        }
        Ok(())
    }

    fn client_config(&self) -> ClientConfig {
        let mut cc = ClientConfig::new();
        cc.set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", &self.auto_offset_reset)
            // Progress lives in the checkpoint store only.
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false");
        cc
    }
}

// ════════════════════════════════════════════════════════════════
//  Error mapping
// ════════════════════════════════════════════════════════════════

fn map_err(e: KafkaError) -> EtlError {
    match e {
        KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) | KafkaError::Subscription(_) => {
            EtlError::config(format!("kafka: {e}"))
        }
        KafkaError::MessageConsumption(code) if is_decode_failure(code) => {
            EtlError::format(format!("kafka: {e}"))
        }
        _ => EtlError::io(format!("kafka: {e}")),
    }
}

fn is_decode_failure(code: rdkafka::types::RDKafkaErrorCode) -> bool {
    use rdkafka::types::RDKafkaErrorCode as C;
    matches!(code, C::BadMessage | C::InvalidMessage | C::BadCompression | C::UnsupportedCompressionType)
}

fn to_raw(msg: &impl Message) -> RawRecord {
    RawRecord {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(<[u8]>::to_vec),
        value: msg.payload().map(<[u8]>::to_vec),
        event_time: msg.timestamp().to_millis().unwrap_or(-1),
    }
}

// ════════════════════════════════════════════════════════════════
//  KafkaLog
// ════════════════════════════════════════════════════════════════

/// LogClient over a librdkafka consumer-group member.
///
/// librdkafka calls block, so every call runs on the blocking pool with
/// its own clone of the consumer handle.
pub struct KafkaLog {
    config: KafkaConfig,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    consumer: Option<Arc<BaseConsumer>>,
    topic: Option<String>,
}

impl KafkaLog {
    pub fn new(config: KafkaConfig) -> Result<Self, EtlError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(State::default()),
        })
    }

    async fn consumer(&self) -> Result<(Arc<BaseConsumer>, String), EtlError> {
        let state = self.state.lock().await;
        match (&state.consumer, &state.topic) {
            (Some(c), Some(t)) => Ok((c.clone(), t.clone())),
            (None, _) => Err(EtlError::logic("kafka: not connected")),
            (_, None) => Err(EtlError::logic("kafka: not subscribed")),
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, EtlError>
where
    F: FnOnce() -> Result<T, EtlError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EtlError::logic(format!("kafka worker: {e}")))?
}

/// Partitions of `topic` currently assigned to this member.
fn assigned(consumer: &BaseConsumer, topic: &str) -> Result<Vec<i32>, EtlError> {
    let tpl = consumer.assignment().map_err(map_err)?;
    let mut partitions: Vec<i32> = tpl.elements_for_topic(topic).iter().map(|e| e.partition()).collect();
    partitions.sort_unstable();
    Ok(partitions)
}

impl LogClient for KafkaLog {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if state.consumer.is_some() {
                return Ok(());
            }
            let consumer: BaseConsumer = self.config.client_config().create().map_err(map_err)?;
            tracing::info!(
                brokers = %self.config.bootstrap_servers,
                group = %self.config.group_id,
                "kafka consumer created"
            );
            state.consumer = Some(Arc::new(consumer));
            Ok(())
        })
    }

    fn subscribe(&self, topic: &str) -> Pin<Box<dyn Future<Output = Result<Vec<i32>, EtlError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let consumer = {
                let mut state = self.state.lock().await;
                let consumer = state
                    .consumer
                    .clone()
                    .ok_or_else(|| EtlError::logic("kafka: not connected"))?;
                if state.topic.as_deref() != Some(topic.as_str()) {
                    consumer.subscribe(&[topic.as_str()]).map_err(map_err)?;
                    state.topic = Some(topic.clone());
                    tracing::info!(%topic, "kafka subscribed");
                }
                consumer
            };

            let wait = Duration::from_millis(self.config.assignment_timeout_ms);
            blocking(move || {
                let started = Instant::now();
                loop {
                    let partitions = assigned(&consumer, &topic)?;
                    if !partitions.is_empty() {
                        return Ok(partitions);
                    }
                    if started.elapsed() >= wait {
                        tracing::warn!(%topic, wait_ms = wait.as_millis() as u64, "no partitions assigned");
                        return Ok(Vec::new());
                    }
                    // Rebalance callbacks only run inside poll. Anything
                    // delivered here is dropped: every partition is re-seeked
                    // right after the assignment is known.
                    if let Some(Err(e)) = consumer.poll(Duration::from_millis(100)) {
                        tracing::debug!(%topic, error = %e, "poll during assignment wait");
                    }
                }
            })
            .await
        })
    }

    fn offset_for_time(
        &self,
        partition: i32,
        ts_ms: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<i64>, EtlError>> + Send + '_>> {
        Box::pin(async move {
            let (consumer, topic) = self.consumer().await?;
            let timeout = self.request_timeout();
            blocking(move || {
                let mut tpl = TopicPartitionList::new();
                tpl.add_partition_offset(&topic, partition, Offset::Offset(ts_ms))
                    .map_err(map_err)?;
                let found = consumer.offsets_for_times(tpl, timeout).map_err(map_err)?;
                let Some(elem) = found.find_partition(&topic, partition) else {
                    return Err(EtlError::io(format!("kafka: no lookup result for {topic}/{partition}")));
                };
                elem.error().map_err(map_err)?;
                match elem.offset() {
                    Offset::Offset(o) => Ok(Some(o)),
                    // Broker answers "end" (-1) when no record is that new.
                    _ => Ok(None),
                }
            })
            .await
        })
    }

    fn seek(&self, partition: i32, target: SeekTarget) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        Box::pin(async move {
            let (consumer, topic) = self.consumer().await?;
            let timeout = self.request_timeout();
            blocking(move || {
                let offset = match target {
                    SeekTarget::Offset(o) => Offset::Offset(o),
                    SeekTarget::End => Offset::End,
                };
                // Fails with an erroneous-state error until the fetcher for a
                // freshly assigned partition is up; mapped to Io and retried.
                consumer.seek(&topic, partition, offset, timeout).map_err(map_err)
            })
            .await
        })
    }

    fn poll(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = Result<Option<RawRecord>, EtlError>> + Send + '_>> {
        Box::pin(async move {
            let (consumer, _) = self.consumer().await?;
            blocking(move || match consumer.poll(timeout) {
                None => Ok(None),
                Some(Ok(msg)) => Ok(Some(to_raw(&msg))),
                Some(Err(e)) => Err(map_err(e)),
            })
            .await
        })
    }

    fn unsubscribe(&self) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some(consumer) = &state.consumer {
                consumer.unsubscribe();
                tracing::info!(topic = ?state.topic, "kafka unsubscribed");
            }
            state.topic = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use etl_api::ErrorKind;
    use rdkafka::types::RDKafkaErrorCode;

    use super::*;

    #[test]
    fn defaults_follow_deployment() {
        let cfg: KafkaConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.bootstrap_servers, "kafka-node1:9092");
        assert_eq!(cfg.group_id, "etl-views");
        assert_eq!(cfg.auto_offset_reset, "earliest");
        cfg.validate().unwrap();
    }

    #[test]
    fn client_properties() {
        let cc = KafkaConfig::default().client_config();
        assert_eq!(cc.get("bootstrap.servers"), Some("kafka-node1:9092"));
        assert_eq!(cc.get("group.id"), Some("etl-views"));
        assert_eq!(cc.get("enable.auto.commit"), Some("false"));
    }

    #[test]
    fn invalid_reset_policy() {
        let cfg = KafkaConfig { auto_offset_reset: "smallest".into(), ..KafkaConfig::default() };
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Config);
        assert!(KafkaLog::new(cfg).is_err());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(map_err(KafkaError::ClientCreation("bad".into())).kind(), ErrorKind::Config);
        assert_eq!(
            map_err(KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure)).kind(),
            ErrorKind::Io
        );
        assert_eq!(
            map_err(KafkaError::MessageConsumption(RDKafkaErrorCode::BadMessage)).kind(),
            ErrorKind::Format
        );
        assert_eq!(map_err(KafkaError::Seek("erroneous state".into())).kind(), ErrorKind::Io);
    }
}
