//! Retry with exponential backoff
//!
//! For callers wrapping arbitrary async operations; independent of the
//! request pipeline's own 429 and 401 handling. The wait before retry `n` is
//! `min(base * 2^(n-1), cap)`. A delay hint carried by the error (a
//! rate-limit retry-after) replaces the computed wait, and errors that are
//! not retryable end the loop at once.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff schedule and attempt budget
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Cap on any computed wait
    pub max_delay: Duration,
    /// Scale computed waits by a random factor in `[0.85, 1.15]`, still capped at `max_delay`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Short waits, for tests and latency-sensitive callers
    pub fn fast() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            ..Self::default()
        }
    }

    /// Tuned for Planning Center API calls
    pub fn for_api() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered wait before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << doublings)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Wait before retry `retry`, honouring a hint from the failed attempt
    pub fn wait_before(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let backoff = self.backoff_for(retry);
        if !self.jitter {
            return backoff;
        }
        let factor = rand::thread_rng().gen_range(0.85..=1.15);
        backoff.mul_f64(factor).min(self.max_delay)
    }
}

/// Errors that can tell a retry loop whether to try again
pub trait RetryableError: std::fmt::Display {
    fn is_retryable(&self) -> bool;

    /// Server-suggested wait in milliseconds
    fn retry_delay_hint(&self) -> Option<u64> {
        None
    }
}

/// Why a retry loop gave up
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    #[error("not retryable: {0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// The error from the final attempt
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Permanent(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Attempts made, when the budget ran out
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            Self::Permanent(_) => None,
        }
    }
}

/// Runs operations under a [`RetryConfig`]
#[derive(Clone, Debug, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent. `label` names the operation in logs.
    pub async fn run<F, Fut, T, E>(&self, label: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(label, attempts, "Succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(RetryError::Permanent(error));
            }
            if attempts > self.config.max_retries {
                return Err(RetryError::Exhausted {
                    attempts,
                    last_error: error,
                });
            }

            let hint = error.retry_delay_hint().map(Duration::from_millis);
            let wait = self.config.wait_before(attempts, hint);
            warn!(
                label,
                attempt = attempts,
                max_retries = self.config.max_retries,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "Attempt failed, backing off"
            );
            sleep(wait).await;
        }
    }
}

/// One-off retry loop
pub async fn retry<F, Fut, T, E>(config: RetryConfig, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    RetryExecutor::new(config).run("retry", operation).await
}
