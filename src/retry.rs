//! Retry utilities with exponential backoff and jitter.
//!
//! Every cluster API call made during a cycle goes through
//! [`call_with_retry`]: each attempt is bounded by a timeout, transient
//! failures are retried a bounded number of times, and anything that is
//! not retryable (404, 403, 409, ...) is returned to the caller on the
//! first attempt so it can decide what the failure means.
//!
//! # Example
//!
//! ```ignore
//! use cleanup_operator::retry::{call_with_retry, RetryConfig};
//!
//! let pods = call_with_retry(&RetryConfig::default(), "list pods", || async {
//!     api.list(&Default::default()).await.map_err(Error::from)
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Configuration for cluster API calls that may fail transiently.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Deadline for a single attempt
    pub call_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Set the per-attempt deadline
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Execute an async operation with a per-attempt timeout and exponential
/// backoff with jitter.
///
/// Only errors for which [`Error::is_retryable`] is true are retried; the
/// last error is returned once `max_attempts` is exhausted.
pub async fn call_with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(config.call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                operation_name,
                config.call_timeout.as_secs(),
            )),
        };

        let e = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !e.is_retryable() {
            return Err(e);
        }

        if attempt >= max_attempts {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(e);
        }

        // Add jitter: 0.5x to 1.5x of the delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %e,
            delay_ms = jittered_delay.as_millis() as u64,
            "Operation failed, retrying"
        );

        tokio::time::sleep(jittered_delay).await;

        // Exponential backoff, capped at max_delay
        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}
