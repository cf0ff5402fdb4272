use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use checkpoint_redis::RedisCheckpoints;
use etl_api::{CheckpointBackend, EventStore, LogClient, now_ms};
use etl_engine::Pipeline;
use etl_memory::{MemoryCheckpoints, MemoryEventStore, MemoryLog};
use log_kafka::KafkaLog;
use storage_clickhouse::ClickHouseStore;

use crate::config::{RunArgs, ServerConfig};
use crate::error::ServerError;

/// Records seeded into the in-memory log for `--dry-run`.
const DRY_RUN_VIEWS: usize = 25;

type Collaborators = (Arc<dyn LogClient>, Arc<dyn EventStore>, Arc<dyn CheckpointBackend>);

pub async fn run(args: RunArgs) -> Result<(), ServerError> {
    tracing::info!("etl-server starting");
    let config = ServerConfig::load(&args.config)?;

    let (log, store, checkpoints) = if args.dry_run {
        dry_run_collaborators(&config.pipeline.topic).await
    } else {
        live_collaborators(&config)?
    };
    let mut pipeline = Pipeline::new(config.pipeline, log, store, checkpoints)?;

    let token = CancellationToken::new();
    let task_token = token.clone();
    let handle = if args.once {
        tokio::spawn(async move {
            let stats = pipeline.run_once(&task_token).await?;
            tracing::info!(
                seen = stats.seen,
                loaded = stats.loaded,
                rejected = stats.rejected,
                batches = stats.batches,
                checkpoint = stats.checkpoint,
                "single cycle finished"
            );
            Ok(())
        })
    } else {
        tokio::spawn(async move { pipeline.run(task_token).await })
    };

    supervise(handle, token, shutdown_signal).await?;
    tracing::info!("shutdown complete");
    Ok(())
}

fn live_collaborators(config: &ServerConfig) -> Result<Collaborators, ServerError> {
    let log = KafkaLog::new(config.kafka.clone())?;
    let store = ClickHouseStore::new(&config.clickhouse)?;
    let checkpoints = RedisCheckpoints::new(&config.redis)?;
    tracing::info!(
        brokers = %config.kafka.bootstrap_servers,
        clickhouse = %config.clickhouse.base_url(),
        database = %config.clickhouse.database,
        redis = %format!("{}:{}/{}", config.redis.host, config.redis.port, config.redis.db),
        "collaborators configured"
    );
    Ok((Arc::new(log), Arc::new(store), Arc::new(checkpoints)))
}

/// In-memory collaborators with a handful of views, one of them malformed.
async fn dry_run_collaborators(topic: &str) -> Collaborators {
    let log = Arc::new(MemoryLog::new(topic, 2));
    let base = now_ms() - DRY_RUN_VIEWS as i64 * 1000;
    for i in 0..DRY_RUN_VIEWS {
        let key = format!("{}:{}", Uuid::new_v4(), Uuid::new_v4());
        let value = ((i * 37) % 5400).to_string();
        let partition = (i % 2) as i32;
        log.append(partition, Some(key.as_bytes()), Some(value.as_bytes()), base + i as i64 * 1000)
            .await;
    }
    log.append(0, None, Some(b"42".as_slice()), base + DRY_RUN_VIEWS as i64 * 1000).await;
    tracing::info!(topic, records = DRY_RUN_VIEWS + 1, "dry run: in-memory collaborators seeded");
    (log, Arc::new(MemoryEventStore::new()), Arc::new(MemoryCheckpoints::new()))
}

/// Wait for the pipeline task. The first signal cancels `token` and lets
/// the pipeline drain; a second one aborts the task.
async fn supervise<S, F>(
    mut handle: JoinHandle<Result<(), etl_engine::EngineError>>,
    token: CancellationToken,
    mut signal: S,
) -> Result<(), ServerError>
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        joined = &mut handle => return Ok(joined??),
        sig = signal() => {
            sig?;
            tracing::info!("shutdown requested, draining in-flight batch");
            token.cancel();
        }
    }

    tokio::select! {
        joined = &mut handle => Ok(joined??),
        sig = signal() => {
            sig?;
            tracing::warn!("second shutdown signal, aborting without drain");
            handle.abort();
            Err(ServerError::Aborted)
        }
    }
}

/// SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = term.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use etl_engine::EngineError;

    use super::*;

    #[tokio::test]
    async fn first_signal_drains_second_aborts() {
        let token = CancellationToken::new();
        // Ignores cancellation, so only the abort can end it.
        let handle = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok::<(), EngineError>(())
        });
        let result = supervise(handle, token.clone(), || async { Ok(()) }).await;
        assert!(token.is_cancelled());
        assert!(matches!(result, Err(ServerError::Aborted)));
    }

    #[tokio::test]
    async fn drained_task_result_is_returned() {
        let token = CancellationToken::new();
        let inner = token.clone();
        let handle = tokio::spawn(async move {
            inner.cancelled().await;
            Err(EngineError::Config("boom".into()))
        });
        let mut signals = 0;
        let result = supervise(handle, token, || {
            signals += 1;
            let first = signals == 1;
            async move {
                if first {
                    Ok(())
                } else {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        })
        .await;
        assert!(matches!(result, Err(ServerError::Engine(EngineError::Config(_)))));
    }

    #[tokio::test]
    async fn dry_run_cycle_loads_seeded_views() {
        let (log, store, checkpoints) = dry_run_collaborators("views").await;
        let config = etl_engine::PipelineConfig { idle_timeout_ms: 20, ..Default::default() };
        let mut pipeline = Pipeline::new(config, log, store, checkpoints).unwrap();
        let stats = pipeline.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(stats.seen, DRY_RUN_VIEWS as u64 + 1);
        assert_eq!(stats.loaded, DRY_RUN_VIEWS as u64);
        assert_eq!(stats.rejected, 1);
    }
}
