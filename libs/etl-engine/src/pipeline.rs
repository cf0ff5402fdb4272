//! Extract → transform → load → checkpoint orchestration.
//!
//! One cycle runs strictly sequentially. The durable checkpoint is written
//! only after every event disposed of before it has been acknowledged by
//! the store, so it never runs ahead of loaded data.

use std::sync::Arc;

use etl_api::{Checkpoint, CheckpointBackend, EventStore, LogClient};
use tokio_util::sync::CancellationToken;

use crate::batch::Batch;
use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::error::EngineError;
use crate::extract::Extractor;
use crate::load::Loader;
use crate::transform::transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Extracting,
    Processing,
    Loading,
    Checkpointing,
    Sleeping,
    Failed,
}

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Records pulled from the log.
    pub seen: u64,
    /// Events acknowledged by the store.
    pub loaded: u64,
    pub rejected: u64,
    /// Bulk inserts issued.
    pub batches: u64,
    /// Checkpoint value at the end of the cycle.
    pub checkpoint: i64,
}

/// Loader + checkpoint side of a cycle, kept apart from the extractor so a
/// live extraction and a flush can borrow the pipeline at the same time.
struct Committer {
    loader: Loader,
    checkpoints: CheckpointStore,
    checkpoint: Checkpoint,
}

impl Committer {
    /// Load whatever is batched, then persist `pending` if it moves the
    /// checkpoint forward.
    async fn flush(
        &mut self,
        state: &mut PipelineState,
        batch: &mut Batch,
        pending: &mut Option<i64>,
        stats: &mut CycleStats,
    ) -> Result<(), EngineError> {
        if !batch.is_empty() {
            transition(state, PipelineState::Loading, &self.checkpoint.pipeline_id);
            self.loader.load(batch).await?;
            stats.loaded += batch.len() as u64;
            stats.batches += 1;
            batch.clear();
        }

        let Some(ts) = pending.take() else {
            return Ok(());
        };
        if ts <= self.checkpoint.last_event_time {
            return Ok(());
        }
        transition(state, PipelineState::Checkpointing, &self.checkpoint.pipeline_id);
        self.checkpoints.set(&self.checkpoint.pipeline_id, ts).await?;
        self.checkpoint.advance(ts);
        tracing::debug!(pipeline = %self.checkpoint.pipeline_id, event_time = ts, "checkpoint advanced");
        Ok(())
    }
}

fn transition(state: &mut PipelineState, next: PipelineState, pipeline_id: &str) {
    if *state != next {
        tracing::debug!(pipeline = %pipeline_id, from = ?*state, to = ?next, "pipeline state");
        *state = next;
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    extractor: Extractor,
    committer: Committer,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        log: Arc<dyn LogClient>,
        store: Arc<dyn EventStore>,
        backend: Arc<dyn CheckpointBackend>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let extractor = Extractor::new(log, config.topic.clone(), config.idle_timeout(), config.retry.log);
        let committer = Committer {
            loader: Loader::new(store, config.retry.store),
            checkpoints: CheckpointStore::new(backend, config.retry.checkpoint),
            checkpoint: Checkpoint::new(config.pipeline_id.clone(), 0),
        };
        Ok(Self {
            config,
            extractor,
            committer,
            state: PipelineState::Idle,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// In-memory checkpoint; equals the durable value after every flush.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.committer.checkpoint
    }

    /// Make sure the target schema exists. Safe to call on every start.
    pub async fn prepare(&mut self) -> Result<(), EngineError> {
        let result = self.committer.loader.ensure_schema().await;
        self.fail_on(result)
    }

    /// Run one full cycle.
    ///
    /// If `shutdown` fires during extraction, records already pulled are
    /// flushed and checkpointed before returning. A cancelled token before
    /// the first record (including while the log is still being connected
    /// or positioned) means nothing is extracted.
    pub async fn run_cycle(&mut self, shutdown: &CancellationToken) -> Result<CycleStats, EngineError> {
        let result = self.cycle(shutdown).await;
        let stats = self.fail_on(result)?;
        transition(&mut self.state, PipelineState::Idle, &self.config.pipeline_id);
        Ok(stats)
    }

    async fn cycle(&mut self, shutdown: &CancellationToken) -> Result<CycleStats, EngineError> {
        let pipeline_id = self.config.pipeline_id.clone();
        let mut stats = CycleStats::default();
        transition(&mut self.state, PipelineState::Extracting, &pipeline_id);

        let durable = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            read = self.committer.checkpoints.get(&pipeline_id) => Some(read?),
        };
        let Some(durable) = durable else {
            tracing::info!(pipeline = %pipeline_id, "shutdown requested, cycle not started");
            stats.checkpoint = self.committer.checkpoint.last_event_time;
            return Ok(stats);
        };
        self.committer.checkpoint.advance(durable);
        let resume_after = self.committer.checkpoint.last_event_time;
        tracing::debug!(pipeline = %pipeline_id, resume_after, "cycle started");

        // Connect/seek retry forever while the log is down.
        let extraction = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            started = self.extractor.extract(resume_after) => Some(started?),
        };
        let Some(mut extraction) = extraction else {
            tracing::info!(pipeline = %pipeline_id, "shutdown requested before extraction started");
            stats.checkpoint = self.committer.checkpoint.last_event_time;
            return Ok(stats);
        };
        let mut batch = Batch::new(self.config.batch_size);
        let mut pending: Option<i64> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(pipeline = %pipeline_id, buffered = batch.len(), "shutdown requested, draining");
                    None
                }
                record = extraction.next() => record,
            };
            let Some(record) = next else { break };
            stats.seen += 1;
            transition(&mut self.state, PipelineState::Processing, &pipeline_id);

            let event_time = record.event_time;
            match transform(record) {
                Ok(event) => batch.push(event),
                Err(rejected) => {
                    stats.rejected += 1;
                    tracing::warn!(
                        pipeline = %pipeline_id,
                        partition = rejected.record.partition,
                        offset = rejected.record.offset,
                        event_time,
                        reason = %rejected.reason,
                        "record rejected"
                    );
                }
            }
            pending = pending.max(Some(event_time));

            if batch.is_full() {
                self.committer
                    .flush(&mut self.state, &mut batch, &mut pending, &mut stats)
                    .await?;
            }
        }

        self.committer
            .flush(&mut self.state, &mut batch, &mut pending, &mut stats)
            .await?;

        stats.checkpoint = self.committer.checkpoint.last_event_time;
        if stats.seen > 0 {
            tracing::info!(
                pipeline = %pipeline_id,
                seen = stats.seen,
                loaded = stats.loaded,
                rejected = stats.rejected,
                batches = stats.batches,
                checkpoint = stats.checkpoint,
                "cycle complete"
            );
        } else {
            tracing::debug!(pipeline = %pipeline_id, checkpoint = stats.checkpoint, "cycle complete, no new records");
        }
        Ok(stats)
    }

    /// Prepare, then cycle until `shutdown` fires or a fatal error occurs.
    /// The log subscription is released either way.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), EngineError> {
        tracing::info!(
            pipeline = %self.config.pipeline_id,
            topic = %self.config.topic,
            batch_size = self.config.batch_size,
            sleep_secs = self.config.sleep_secs,
            "pipeline starting"
        );
        let result = self.run_loop(&shutdown).await;
        self.extractor.close().await;
        if result.is_ok() {
            transition(&mut self.state, PipelineState::Idle, &self.config.pipeline_id);
            tracing::info!(
                pipeline = %self.config.pipeline_id,
                checkpoint = self.committer.checkpoint.last_event_time,
                "pipeline stopped"
            );
        }
        result
    }

    /// Prepare, run a single cycle and release the log subscription.
    pub async fn run_once(&mut self, shutdown: &CancellationToken) -> Result<CycleStats, EngineError> {
        let result = match self.prepare().await {
            Ok(()) => self.run_cycle(shutdown).await,
            Err(e) => Err(e),
        };
        self.extractor.close().await;
        result
    }

    async fn run_loop(&mut self, shutdown: &CancellationToken) -> Result<(), EngineError> {
        self.prepare().await?;
        while !shutdown.is_cancelled() {
            self.run_cycle(shutdown).await?;
            if shutdown.is_cancelled() {
                break;
            }
            transition(&mut self.state, PipelineState::Sleeping, &self.config.pipeline_id);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.sleep()) => {}
            }
        }
        Ok(())
    }

    fn fail_on<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(e) = &result {
            transition(&mut self.state, PipelineState::Failed, &self.config.pipeline_id);
            tracing::error!(pipeline = %self.config.pipeline_id, error = %e, "pipeline failed");
        }
        result
    }
}
