//! Bounded retry and polling with an injectable delay
//!
//! Nothing here sleeps directly: waits go through a [`Sleeper`], so tests can
//! run the loops without real time passing.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed-backoff retry of transient provider errors
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Runs `operation`, retrying while it fails with a transient error
pub async fn retry_transient<F, Fut, T>(
    sleeper: &dyn Sleeper,
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts.max(1) => {
                tracing::warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    "Transient failure, retrying"
                );
                sleeper.sleep(config.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Polls `probe` until it yields a value, at most `attempts` times
///
/// Fails with [`CloudError::Timeout`] when the value never shows up.
pub async fn poll_until<F, Fut, T>(
    sleeper: &dyn Sleeper,
    attempts: u32,
    interval: Duration,
    what: &str,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 1..=attempts.max(1) {
        if let Some(value) = probe().await? {
            return Ok(value);
        }
        if attempt < attempts {
            tracing::debug!("Waiting for {} ({}/{})", what, attempt, attempts);
            sleeper.sleep(interval).await;
        }
    }
    Err(CloudError::Timeout(format!(
        "{} not reached after {} attempts",
        what, attempts
    )))
}
