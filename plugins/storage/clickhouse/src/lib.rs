use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use etl_api::{DomainEvent, EtlError, EventStore};

pub mod sql;

use sql::validate_identifier;

// ════════════════════════════════════════════════════════════════
//  Config
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_table")]
    pub table: String,
    /// Adds `ON CLUSTER <name>` to the DDL. None = single node.
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "clickhouse-node1".into()
}
fn default_port() -> u16 {
    8123
}
fn default_user() -> String {
    "default".into()
}
fn default_database() -> String {
    "shard".into()
}
fn default_table() -> String {
    "views".into()
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            table: default_table(),
            cluster: None,
            tls: false,
            accept_invalid_certs: false,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ClickHouseConfig {
    pub fn validate(&self) -> Result<(), EtlError> {
        if self.host.trim().is_empty() {
            return Err(EtlError::config("clickhouse.host is empty"));
        }
        validate_identifier(&self.database, "clickhouse.database")?;
        validate_identifier(&self.table, "clickhouse.table")?;
        if let Some(cluster) = &self.cluster {
            validate_identifier(cluster, "clickhouse.cluster")?;
        }
        if self.request_timeout_secs == 0 {
            return Err(EtlError::config("clickhouse.request_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

// ════════════════════════════════════════════════════════════════
//  Error classification
// ════════════════════════════════════════════════════════════════

/// Server-side exception codes worth retrying: timeouts, overload,
/// replica/keeper unavailability, unknown insert status.
const TRANSIENT_CODES: &[u32] = &[159, 202, 209, 210, 241, 242, 252, 279, 285, 319, 425, 999];

/// UNKNOWN_USER, AUTHENTICATION_FAILED.
const AUTH_CODES: &[u32] = &[192, 516];

/// Map a failed HTTP response onto an ErrorKind.
///
/// `code` is the `X-ClickHouse-Exception-Code` header, absent when the
/// response did not come from ClickHouse itself (proxy, load balancer).
fn classify(status: StatusCode, code: Option<u32>, body: &str) -> EtlError {
    let body = body.trim();
    match code {
        Some(c) if AUTH_CODES.contains(&c) => EtlError::config(format!("CH auth (code {c}): {body}")),
        Some(c) if TRANSIENT_CODES.contains(&c) => EtlError::io(format!("CH busy (code {c}): {body}")),
        Some(c) => EtlError::schema(format!("CH rejected statement (code {c}): {body}")),
        None if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            EtlError::io(format!("CH HTTP {status}: {body}"))
        }
        None if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            EtlError::config(format!("CH HTTP {status}: {body}"))
        }
        None => EtlError::schema(format!("CH HTTP {status}: {body}")),
    }
}

// ════════════════════════════════════════════════════════════════
//  ClickHouseStore
// ════════════════════════════════════════════════════════════════

/// ClickHouse EventStore over the HTTP interface.
///
/// Таблица MergeTree, ORDER BY (actor_id, subject_id). Все запросы
/// используют полностью квалифицированное имя `database.table`, поэтому
/// параметр `database` в URL не передаётся (на момент CREATE DATABASE
/// базы ещё может не быть).
pub struct ClickHouseStore {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    database: String,
    table: String,
    cluster: Option<String>,
}

impl ClickHouseStore {
    pub fn new(cfg: &ClickHouseConfig) -> Result<Self, EtlError> {
        cfg.validate()?;
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| EtlError::config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: cfg.base_url(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            database: cfg.database.clone(),
            table: cfg.table.clone(),
            cluster: cfg.cluster.clone(),
        })
    }

    async fn check(resp: reqwest::Response) -> Result<String, EtlError> {
        let status = resp.status();
        let code = resp
            .headers()
            .get("X-ClickHouse-Exception-Code")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok());
        let body = resp.text().await.map_err(|e| EtlError::io(format!("CH read: {e}")))?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify(status, code, &body))
        }
    }

    /// Execute a SQL statement (DDL / DESCRIBE). Body = SQL text.
    async fn exec(&self, sql: &str) -> Result<String, EtlError> {
        let resp = self
            .http
            .post(&self.base_url)
            .query(&[("user", self.user.as_str()), ("password", self.password.as_str())])
            .body(sql.to_owned())
            .send()
            .await
            .map_err(|e| EtlError::io(format!("CH request: {e}")))?;
        Self::check(resp).await
    }

    /// Execute an INSERT using FORMAT JSONEachRow.
    /// The INSERT statement goes in the `query` URL parameter;
    /// the NDJSON body goes as the POST body.
    async fn exec_insert(&self, insert_sql: &str, ndjson_body: String) -> Result<(), EtlError> {
        let resp = self
            .http
            .post(&self.base_url)
            .query(&[
                ("user", self.user.as_str()),
                ("password", self.password.as_str()),
                ("query", insert_sql),
            ])
            .body(ndjson_body)
            .send()
            .await
            .map_err(|e| EtlError::io(format!("CH insert: {e}")))?;
        Self::check(resp).await.map(|_| ())
    }
}

impl EventStore for ClickHouseStore {
    fn ensure_schema(&self) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        Box::pin(async move {
            let cluster = self.cluster.as_deref();
            self.exec(&sql::create_database(&self.database, cluster))
                .await
                .map_err(|e| e.with_context("create database"))?;
            self.exec(&sql::create_table(&self.database, &self.table, cluster))
                .await
                .map_err(|e| e.with_context("create table"))?;

            let described = self.exec(&sql::describe_table(&self.database, &self.table)).await?;
            sql::verify_columns(&described)
                .map_err(|e| e.with_context(format!("{}.{}", self.database, self.table)))?;
            tracing::debug!(database = %self.database, table = %self.table, cluster = ?self.cluster, "schema verified");
            Ok(())
        })
    }

    fn insert(&self, events: &[DomainEvent]) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        let body = sql::insert_body(events);
        let rows = events.len();
        Box::pin(async move {
            if rows == 0 {
                return Ok(());
            }
            let body = body?;
            let insert_sql = sql::insert_statement(&self.database, &self.table);
            self.exec_insert(&insert_sql, body).await?;
            tracing::trace!(rows, table = %self.table, "insert acknowledged");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use etl_api::ErrorKind;

    use super::*;

    #[test]
    fn defaults_follow_deployment() {
        let cfg: ClickHouseConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.base_url(), "http://clickhouse-node1:8123");
        assert_eq!(cfg.database, "shard");
        assert_eq!(cfg.table, "views");
        assert_eq!(cfg.cluster, None);
        cfg.validate().unwrap();
    }

    #[test]
    fn cluster_name_is_validated() {
        let cfg: ClickHouseConfig = toml::from_str(r#"cluster = "company cluster""#).unwrap();
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Config);
        let cfg = ClickHouseConfig { table: "views`".into(), ..ClickHouseConfig::default() };
        assert!(ClickHouseStore::new(&cfg).is_err());
    }

    #[test]
    fn exception_codes_drive_the_kind() {
        let e = classify(StatusCode::INTERNAL_SERVER_ERROR, Some(516), "Authentication failed");
        assert_eq!(e.kind(), ErrorKind::Config);
        let e = classify(StatusCode::INTERNAL_SERVER_ERROR, Some(159), "Timeout exceeded");
        assert_eq!(e.kind(), ErrorKind::Io);
        let e = classify(StatusCode::BAD_REQUEST, Some(62), "Syntax error");
        assert_eq!(e.kind(), ErrorKind::Schema);
    }

    #[test]
    fn proxy_errors_without_code_are_transient() {
        assert_eq!(classify(StatusCode::BAD_GATEWAY, None, "").kind(), ErrorKind::Io);
        assert_eq!(classify(StatusCode::SERVICE_UNAVAILABLE, None, "").kind(), ErrorKind::Io);
        assert_eq!(classify(StatusCode::FORBIDDEN, None, "").kind(), ErrorKind::Config);
        assert_eq!(classify(StatusCode::NOT_FOUND, None, "").kind(), ErrorKind::Schema);
    }
}
