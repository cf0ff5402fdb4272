//! Retry combinator shared by the log, store and checkpoint boundaries.
//!
//! Delay for attempt `n` (0-based) is `base_delay_ms * 2^n`, capped at
//! `max_delay_ms`, then scaled by a random factor in `[jitter_min, jitter_max]`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

/// Backoff policy for one I/O boundary.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `None` = retry forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
}

fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter_min() -> f64 {
    0.5
}
fn default_jitter_max() -> f64 {
    1.5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
        }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::unbounded()
        }
    }

    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, min: f64, max: f64) -> Self {
        self.jitter_min = min;
        self.jitter_max = max;
        self
    }

    /// Same delays, no attempt limit.
    #[must_use]
    pub fn unlimited(self) -> Self {
        Self { max_attempts: None, ..self }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be at least 1".into());
        }
        if !(self.jitter_min >= 0.0 && self.jitter_min <= self.jitter_max) {
            return Err(format!(
                "jitter range [{}, {}] is invalid",
                self.jitter_min, self.jitter_max
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(format!(
                "base_delay_ms {} exceeds max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }

    /// Exponential delay before jitter.
    fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempt);
        self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms)
    }

    /// Delay to sleep after the `attempt`-th failure (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_ms(attempt) as f64;
        let factor = if self.jitter_min < self.jitter_max {
            rand::thread_rng().gen_range(self.jitter_min..=self.jitter_max)
        } else {
            self.jitter_min
        };
        let ms = (backoff * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

/// Why `retry` gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Attempt limit reached; carries the last error.
    Exhausted { attempts: u32, last: E },
    /// The error was not retryable.
    Aborted(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(e) => e,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryError::Aborted(e) => write!(f, "{e}"),
        }
    }
}

/// Run `f` until it succeeds, the error fails `retry_if`, or the policy
/// runs out of attempts.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    op: &str,
    retry_if: P,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(op, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if !retry_if(&e) {
                    return Err(RetryError::Aborted(e));
                }
                attempt += 1;
                if let Some(max) = policy.max_attempts {
                    if attempt >= max {
                        tracing::error!(op, attempts = attempt, error = %e, "retry budget exhausted");
                        return Err(RetryError::Exhausted { attempts: attempt, last: e });
                    }
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy::unbounded().with_base_delay_ms(1).with_max_delay_ms(4).with_jitter(1.0, 1.0)
    }

    #[test]
    fn exponential_without_jitter() {
        let p = RetryPolicy::unbounded().with_base_delay_ms(100).with_jitter(1.0, 1.0);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let p = RetryPolicy::unbounded()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(1.0, 1.0);
        assert_eq!(p.delay_for(10), Duration::from_millis(5000));
        assert_eq!(p.delay_for(63), Duration::from_millis(5000));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let p = RetryPolicy::unbounded().with_base_delay_ms(100).with_jitter(0.5, 1.5);
        for _ in 0..50 {
            let d = p.delay_for(0).as_millis();
            assert!((50..=150).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn validate_rejects_bad_policies() {
        assert!(RetryPolicy::bounded(0).validate().is_err());
        assert!(RetryPolicy::unbounded().with_jitter(1.5, 0.5).validate().is_err());
        assert!(RetryPolicy::unbounded().with_base_delay_ms(60_000).validate().is_err());
        assert!(RetryPolicy::bounded(3).validate().is_ok());
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<u32, RetryError<String>> = retry(&fast(), "test", |_| true, || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bounded_policy_exhausts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = RetryPolicy { max_attempts: Some(4), ..fast() };
        let result: Result<(), RetryError<String>> = retry(&policy, "test", |_| true, || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err("down".to_string()) }
        })
        .await;
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last, "down");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_aborts_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), RetryError<String>> =
            retry(&fast(), "test", |e: &String| e != "fatal", || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Aborted(ref e)) if e == "fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
