use std::io::ErrorKind;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use checkpoint_redis::RedisConfig;
use etl_engine::PipelineConfig;
use log_kafka::KafkaConfig;
use storage_clickhouse::ClickHouseConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "etl-server", about = "Kafka → ClickHouse ETL для событий просмотра")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить pipeline
    Run(RunArgs),
    /// Показать сохранённый checkpoint
    Checkpoint(CheckpointArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Выполнить один цикл и выйти
    #[arg(long)]
    pub once: bool,
    /// In-memory log/store/checkpoints seeded with sample views
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Clone, Debug)]
pub struct CheckpointArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Config file location plus per-field overrides. Flags and environment
/// variables win over the file.
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Путь к TOML конфиг файлу (отсутствующий файл = значения по умолчанию)
    #[arg(long, default_value = "etl.toml", env = "ETL_CONFIG")]
    pub config: String,

    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS")]
    pub kafka_bootstrap_servers: Option<String>,
    #[arg(long, env = "KAFKA_GROUP_ID")]
    pub kafka_group_id: Option<String>,
    #[arg(long, env = "KAFKA_TOPIC")]
    pub kafka_topic: Option<String>,

    #[arg(long, env = "CLICKHOUSE_HOST")]
    pub clickhouse_host: Option<String>,
    #[arg(long, env = "CLICKHOUSE_PORT")]
    pub clickhouse_port: Option<u16>,
    #[arg(long, env = "CLICKHOUSE_USER")]
    pub clickhouse_user: Option<String>,
    #[arg(long, env = "CLICKHOUSE_PASSWORD", hide_env_values = true)]
    pub clickhouse_password: Option<String>,
    #[arg(long, env = "CLICKHOUSE_DATABASE")]
    pub clickhouse_database: Option<String>,
    #[arg(long, env = "CLICKHOUSE_CLUSTER")]
    pub clickhouse_cluster: Option<String>,

    #[arg(long, env = "REDIS_HOST")]
    pub redis_host: Option<String>,
    #[arg(long, env = "REDIS_PORT")]
    pub redis_port: Option<u16>,
    #[arg(long, env = "REDIS_DB")]
    pub redis_db: Option<i64>,

    #[arg(long, env = "ETL_PIPELINE_ID")]
    pub pipeline_id: Option<String>,
    #[arg(long, env = "ETL_BATCH_SIZE")]
    pub batch_size: Option<usize>,
    #[arg(long, env = "ETL_SLEEP_SECONDS")]
    pub sleep_seconds: Option<u64>,
}

// ---- TOML Config ----

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
}

impl ServerConfig {
    /// Read the file (if any), apply overrides, validate.
    pub fn load(args: &ConfigArgs) -> Result<Self, ServerError> {
        let path = args.config.as_str();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                tracing::info!(config = %path, "loaded config");
                Self::from_toml(&content)
                    .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(config = %path, "config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(ServerError::Config { context: "read", detail: format!("'{path}': {e}") });
            }
        };
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn apply(&mut self, args: &ConfigArgs) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        set(&mut self.kafka.bootstrap_servers, &args.kafka_bootstrap_servers);
        set(&mut self.kafka.group_id, &args.kafka_group_id);
        set(&mut self.pipeline.topic, &args.kafka_topic);

        set(&mut self.clickhouse.host, &args.clickhouse_host);
        set(&mut self.clickhouse.port, &args.clickhouse_port);
        set(&mut self.clickhouse.user, &args.clickhouse_user);
        set(&mut self.clickhouse.password, &args.clickhouse_password);
        set(&mut self.clickhouse.database, &args.clickhouse_database);
        if let Some(cluster) = &args.clickhouse_cluster {
            self.clickhouse.cluster = (!cluster.is_empty()).then(|| cluster.clone());
        }

        set(&mut self.redis.host, &args.redis_host);
        set(&mut self.redis.port, &args.redis_port);
        set(&mut self.redis.db, &args.redis_db);

        set(&mut self.pipeline.pipeline_id, &args.pipeline_id);
        set(&mut self.pipeline.batch_size, &args.batch_size);
        set(&mut self.pipeline.sleep_secs, &args.sleep_seconds);
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        let invalid = |detail: String| ServerError::Config { context: "validate", detail };
        self.pipeline.validate().map_err(|e| invalid(e.to_string()))?;
        self.kafka.validate().map_err(|e| invalid(e.to_string()))?;
        self.clickhouse.validate().map_err(|e| invalid(e.to_string()))?;
        self.redis.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ConfigArgs {
        let mut argv = vec!["etl-server", "run"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(run) => run.config,
            Commands::Checkpoint(_) => unreachable!(),
        }
    }

    #[test]
    fn full_file() {
        let cfg = ServerConfig::from_toml(
            r#"
            [pipeline]
            pipeline_id = "views"
            batch_size = 250
            sleep_secs = 2

            [pipeline.retry.checkpoint]
            max_attempts = 8

            [kafka]
            bootstrap_servers = "kafka-node1:9092,kafka-node2:9092"

            [clickhouse]
            host = "clickhouse-node1"
            cluster = "company_cluster"

            [redis]
            host = "redis"
            db = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pipeline.batch_size, 250);
        assert_eq!(cfg.pipeline.retry.checkpoint.max_attempts, Some(8));
        assert_eq!(cfg.kafka.bootstrap_servers, "kafka-node1:9092,kafka-node2:9092");
        assert_eq!(cfg.kafka.group_id, "etl-views");
        assert_eq!(cfg.clickhouse.cluster.as_deref(), Some("company_cluster"));
        assert_eq!(cfg.redis.db, 2);
        cfg.validate().unwrap();
    }

    #[test]
    fn overrides_win_over_file() {
        let mut cfg = ServerConfig::from_toml("[pipeline]\nbatch_size = 10\n[redis]\nport = 6380\n").unwrap();
        cfg.apply(&args(&[
            "--batch-size",
            "500",
            "--redis-host",
            "redis-2",
            "--kafka-topic",
            "views-v2",
            "--clickhouse-cluster",
            "",
        ]));
        assert_eq!(cfg.pipeline.batch_size, 500);
        assert_eq!(cfg.pipeline.topic, "views-v2");
        assert_eq!(cfg.redis.host, "redis-2");
        assert_eq!(cfg.redis.port, 6380);
        assert_eq!(cfg.clickhouse.cluster, None);
    }

    #[test]
    fn missing_file_means_defaults() {
        let path = std::env::temp_dir().join("etl-server-no-such-config.toml");
        let path = path.to_string_lossy().into_owned();
        let cfg = ServerConfig::load(&args(&["--config", &path])).unwrap();
        assert_eq!(cfg.pipeline.pipeline_id, "views");
        assert_eq!(cfg.clickhouse.database, "shard");
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut cfg = ServerConfig::default();
        cfg.clickhouse.table = "views; DROP".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("clickhouse.table"), "{err}");
    }
}
