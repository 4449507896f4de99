//! Bounded retry with backoff, jitter and a hard deadline.
//!
//! Used by the controller while the agent reports that human verification is
//! still pending. Only errors that classify themselves as retryable are
//! retried; everything else is returned immediately.
//!
//! # Example
//!
//! ```ignore
//! use masc_pairing::retry::{retry_with_backoff, RetryConfig};
//!
//! let certs = retry_with_backoff(
//!     &RetryConfig::default(),
//!     "issue_certificate",
//!     || async { masc_client.masc(&ecdh, csr_pem).await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::{DEFAULT_RETRY_DEADLINE, DEFAULT_RETRY_DELAY};

/// Errors that know whether they are worth another attempt
pub trait Retryable: std::fmt::Display {
    /// Whether the same operation may be attempted again
    fn is_retryable(&self) -> bool;

    /// The error to return once the deadline has passed
    fn deadline_exceeded(deadline: Duration) -> Self;
}

impl Retryable for crate::Error {
    fn is_retryable(&self) -> bool {
        crate::Error::is_retryable(self)
    }

    fn deadline_exceeded(deadline: Duration) -> Self {
        crate::Error::DeadlineExceeded(deadline)
    }
}

/// Retry policy
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = bounded only by the deadline)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt (1.0 = fixed)
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the delay (0.25 = ±25%)
    pub jitter: f64,
    /// Wall-clock ceiling for the whole loop
    pub deadline: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_RETRY_DELAY,
            backoff_multiplier: 1.0,
            jitter: 0.25,
            deadline: Some(DEFAULT_RETRY_DEADLINE),
        }
    }
}

impl RetryConfig {
    /// Create a config with a different deadline
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            ..Default::default()
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.jitter.clamp(0.0, 1.0);
        if spread == 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }
}

/// Execute an async operation until it succeeds, fails permanently, or runs out of time.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging purposes
/// * `operation` - The async operation to retry
///
/// # Returns
/// The result of the operation, the first non-retryable error, the last
/// retryable error once `max_attempts` is exhausted, or
/// [`Retryable::deadline_exceeded`] once the deadline passes.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable,
{
    let started = tokio::time::Instant::now();
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let outcome = match config.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, operation()).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(
                            operation = %operation_name,
                            attempt = attempt,
                            "Operation did not finish before the deadline"
                        );
                        return Err(E::deadline_exceeded(deadline));
                    }
                }
            }
            None => operation().await,
        };

        let e = match outcome {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !e.is_retryable() {
            return Err(e);
        }

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(e);
        }

        let jittered_delay = config.jittered(delay);

        if let Some(deadline) = config.deadline {
            if started.elapsed() + jittered_delay >= deadline {
                error!(
                    operation = %operation_name,
                    attempt = attempt,
                    deadline_ms = deadline.as_millis(),
                    "Operation still failing at deadline"
                );
                return Err(E::deadline_exceeded(deadline));
            }
        }

        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %e,
            delay_ms = jittered_delay.as_millis(),
            "Operation failed, retrying"
        );

        tokio::time::sleep(jittered_delay).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}
