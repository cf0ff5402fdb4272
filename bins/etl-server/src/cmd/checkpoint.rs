use std::sync::Arc;

use checkpoint_redis::RedisCheckpoints;
use etl_api::{checkpoint_key, datetime_from_ms};
use etl_engine::CheckpointStore;

use crate::config::{CheckpointArgs, ServerConfig};
use crate::error::ServerError;

/// Print the stored checkpoint of the configured pipeline.
pub async fn run(args: CheckpointArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;
    let backend = RedisCheckpoints::new(&config.redis)?;
    let store = CheckpointStore::new(Arc::new(backend), config.pipeline.retry.checkpoint);

    let pipeline_id = config.pipeline.pipeline_id.as_str();
    let value = store.get(pipeline_id).await?;
    println!("{}", describe(pipeline_id, value));
    Ok(())
}

fn describe(pipeline_id: &str, value: i64) -> String {
    let key = checkpoint_key(pipeline_id);
    if value == 0 {
        return format!("{key}: never checkpointed");
    }
    match datetime_from_ms(value) {
        Some(at) => format!("{key}: {value} ({})", at.to_rfc3339()),
        None => format!("{key}: {value}"),
    }
}
