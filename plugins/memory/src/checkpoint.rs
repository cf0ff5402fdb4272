use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use etl_api::{CheckpointBackend, EtlError};

/// Key/value checkpoint service held in memory.
#[derive(Default)]
pub struct MemoryCheckpoints {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, i64>,
    history: Vec<(String, i64)>,
    read_failures: u32,
    read_error: Option<EtlError>,
    write_failures: u32,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn value(&self, key: &str) -> Option<i64> {
        self.inner.read().await.values.get(key).copied()
    }

    /// Successful writes, oldest first.
    pub async fn history(&self) -> Vec<(String, i64)> {
        self.inner.read().await.history.clone()
    }

    /// Seed a value without recording it in the history.
    pub async fn insert(&self, key: impl Into<String>, value: i64) {
        self.inner.write().await.values.insert(key.into(), value);
    }

    /// Fail the next `n` reads with a transient error.
    pub async fn fail_reads(&self, n: u32) {
        self.inner.write().await.read_failures = n;
    }

    /// Fail every read with `err`.
    pub async fn fail_reads_with(&self, err: EtlError) {
        self.inner.write().await.read_error = Some(err);
    }

    /// Fail the next `n` writes with a transient error.
    pub async fn fail_writes(&self, n: u32) {
        self.inner.write().await.write_failures = n;
    }
}

impl CheckpointBackend for MemoryCheckpoints {
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<i64>, EtlError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if let Some(err) = &inner.read_error {
                return Err(err.clone());
            }
            if inner.read_failures > 0 {
                inner.read_failures -= 1;
                return Err(EtlError::io("memory checkpoints: connection reset"));
            }
            Ok(inner.values.get(&key).copied())
        })
    }

    fn set(&self, key: &str, value: i64) -> Pin<Box<dyn Future<Output = Result<(), EtlError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if inner.write_failures > 0 {
                inner.write_failures -= 1;
                return Err(EtlError::io("memory checkpoints: connection reset"));
            }
            inner.values.insert(key.clone(), value);
            inner.history.push((key, value));
            Ok(())
        })
    }
}
