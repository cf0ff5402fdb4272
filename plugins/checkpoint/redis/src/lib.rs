use std::future::Future;
use std::pin::Pin;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError};
use serde::Deserialize;
use tokio::sync::Mutex;

use etl_api::{CheckpointBackend, EtlError};

// ════════════════════════════════════════════════════════════════
//  Config
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_host() -> String {
    "redis".into()
}
fn default_port() -> u16 {
    6379
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db: 0,
            password: None,
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<(), EtlError> {
        if self.host.trim().is_empty() {
            return Err(EtlError::config("redis.host is empty"));
        }
        if self.db < 0 {
            return Err(EtlError::config(format!("redis.db must be >= 0, got {}", self.db)));
        }
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Error mapping
// ════════════════════════════════════════════════════════════════

fn map_err(e: RedisError) -> EtlError {
    use redis::ErrorKind as K;
    if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() {
        return EtlError::io(format!("redis: {e}"));
    }
    match e.kind() {
        // READONLY: a replica answering while the master fails over.
        K::IoError | K::BusyLoadingError | K::TryAgain | K::ClusterDown | K::MasterDown | K::ReadOnly => {
            EtlError::io(format!("redis: {e}"))
        }
        K::AuthenticationFailed | K::InvalidClientConfig => EtlError::config(format!("redis: {e}")),
        K::TypeError => EtlError::format(format!("redis: {e}")),
        _ => EtlError::logic(format!("redis: {e}")),
    }
}

/// Checkpoint values are stored as decimal strings.
fn parse_checkpoint(key: &str, raw: Option<String>) -> Result<Option<i64>, EtlError> {
    match raw {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| EtlError::format(format!("redis: value of '{key}' is not an integer: '{s}'"))),
    }
}

// ════════════════════════════════════════════════════════════════
//  RedisCheckpoints
// ════════════════════════════════════════════════════════════════

/// CheckpointBackend over Redis GET/SET.
///
/// Соединение открывается лениво при первом запросе; после I/O ошибки
/// сбрасывается и переоткрывается на следующем вызове.
pub struct RedisCheckpoints {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCheckpoints {
    pub fn new(cfg: &RedisConfig) -> Result<Self, EtlError> {
        cfg.validate()?;
        let client = redis::Client::open(cfg.connection_info())
            .map_err(|e| EtlError::config(format!("redis client: {e}")))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, EtlError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await.map_err(map_err)?;
        tracing::debug!("redis connection established");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forget the cached connection after a transport failure.
    async fn reset_on_io(&self, err: EtlError) -> EtlError {
        if err.is_transient() {
            *self.conn.lock().await = None;
        }
        err
    }
}

impl CheckpointBackend for RedisCheckpoints {
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<i64>, EtlError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.connection().await?;
            let raw: Option<String> = match conn.get(&key).await {
                Ok(v) => v,
                Err(e) => return Err(self.reset_on_io(map_err(e)).await),
            };
            parse_checkpoint(&key, raw)
        })
    }

    fn set(&self, key: &str, value: i64) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.connection().await?;
            match conn.set::<_, _, ()>(&key, value).await {
                Ok(()) => Ok(()),
                Err(e) => Err(self.reset_on_io(map_err(e)).await),
            }
        })
    }
}
