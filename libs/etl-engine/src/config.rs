use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;
use crate::retry::RetryPolicy;

// ═══════════════════════════════════════════════════════════════
//  Pipeline Config
// ═══════════════════════════════════════════════════════════════

/// Параметры оркестратора: идентичность, топик, размер batch'а, паузы.
///
/// Строится один раз при старте процесса и передаётся в `Pipeline::new`
/// по значению.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Identity under which the checkpoint is stored.
    #[serde(default = "default_pipeline_id")]
    pub pipeline_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Events per bulk insert.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between cycles, seconds.
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: u64,
    /// Extraction ends after this long without a new record.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_pipeline_id() -> String {
    "views".into()
}
fn default_topic() -> String {
    "views".into()
}
fn default_batch_size() -> usize {
    100
}
fn default_sleep_secs() -> u64 {
    5
}
fn default_idle_timeout_ms() -> u64 {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_id: default_pipeline_id(),
            topic: default_topic(),
            batch_size: default_batch_size(),
            sleep_secs: default_sleep_secs(),
            idle_timeout_ms: default_idle_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn sleep(&self) -> Duration {
        Duration::from_secs(self.sleep_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.pipeline_id.trim().is_empty() {
            return Err(EngineError::Config("pipeline.pipeline_id must not be empty".into()));
        }
        if self.topic.trim().is_empty() {
            return Err(EngineError::Config("pipeline.topic must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(EngineError::Config("pipeline.batch_size must be > 0".into()));
        }
        if self.idle_timeout_ms == 0 {
            return Err(EngineError::Config("pipeline.idle_timeout_ms must be > 0".into()));
        }
        self.retry.validate()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Retry Config
// ═══════════════════════════════════════════════════════════════

/// Политики повторов для трёх I/O границ.
///
/// `log` и `store` по умолчанию без ограничения попыток; `checkpoint`
/// ограничен, иначе CheckpointWriteExhausted недостижим.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryPolicy::unbounded")]
    pub log: RetryPolicy,
    #[serde(default = "RetryPolicy::unbounded")]
    pub store: RetryPolicy,
    #[serde(default = "default_checkpoint_policy")]
    pub checkpoint: RetryPolicy,
}

fn default_checkpoint_policy() -> RetryPolicy {
    RetryPolicy::bounded(20)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            log: RetryPolicy::unbounded(),
            store: RetryPolicy::unbounded(),
            checkpoint: default_checkpoint_policy(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, policy) in [("log", &self.log), ("store", &self.store), ("checkpoint", &self.checkpoint)] {
            policy
                .validate()
                .map_err(|e| EngineError::Config(format!("pipeline.retry.{name}: {e}")))?;
        }
        Ok(())
    }
}
