//! Exponential-backoff retry wrapper shared by every remote call.

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Error descriptions containing any of these (case-insensitive) are worth retrying.
pub const RETRYABLE_MARKERS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "internal error",
    "timeout",
    "temporarily unavailable",
    "service unavailable",
];

/// Jitter added to every backoff delay, in seconds. Absolute, not scaled by the delay.
const JITTER_RANGE_SECS: std::ops::Range<f64> = 0.1..0.3;

/// Upper bound for a configured retry budget.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Retry budget and base delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    pub fn from_config(cfg: &common::RetryConfig) -> Self {
        let default = Self::default();
        Self {
            max_retries: cfg.max_retries.unwrap_or(default.max_retries).min(MAX_RETRIES_LIMIT),
            base_delay: cfg
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default.base_delay),
        }
    }

    /// `base_delay * 2^attempt + jitter`, saturating at `Duration::MAX`
    pub fn backoff_delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .saturating_add(jitter)
    }
}

/// Classify an error by its full description (context chain included).
pub fn is_retryable(err: &anyhow::Error) -> bool {
    let description = format!("{:#}", err).to_lowercase();
    RETRYABLE_MARKERS
        .iter()
        .any(|marker| description.contains(marker))
}

fn random_jitter() -> Duration {
    Duration::from_secs_f64(rand::thread_rng().gen_range(JITTER_RANGE_SECS))
}

/// Waiting between attempts. Swappable so tests never block on real time.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs zero-argument remote operations, retrying transient failures.
#[derive(Clone)]
pub struct ResilientInvoker {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ResilientInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute `call` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. The last error is returned unchanged.
    pub async fn invoke<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let total = self.policy.max_retries + 1;
        let mut attempt: u32 = 0;

        loop {
            info!("{}: attempt {}/{}", label, attempt + 1, total);

            let err = match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!("{}: succeeded on attempt {}/{}", label, attempt + 1, total);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !is_retryable(&err) {
                warn!("{}: attempt {} failed with non-retryable error: {:#}", label, attempt + 1, err);
                return Err(err);
            }

            if attempt >= self.policy.max_retries {
                error!("{}: all {} attempts failed, last error: {:#}", label, total, err);
                return Err(err);
            }

            let delay = self.policy.backoff_delay(attempt, random_jitter());
            warn!(
                "{}: attempt {} failed: {:#}; retrying in {:.1}s",
                label,
                attempt + 1,
                err,
                delay.as_secs_f64()
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}
