//! Exponential-backoff retry for resources that become ready on their
//! own schedule.
//!
//! [`retry_with_backoff`] keeps calling an operation with growing delays
//! until it succeeds, the attempt budget is spent, or the
//! [`CancellationToken`] is triggered.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(750),
            max_delay: Duration::from_secs(3),
            multiplier: 1.5,
            max_attempts: 10,
        }
    }
}

impl BackoffConfig {
    /// Same curve, different attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    #[error("retry cancelled")]
    Cancelled,
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run `operation` until it succeeds, backing off between failures.
///
/// `operation` receives the 1-based attempt number. `what` names the
/// operation in log lines.
pub async fn retry_with_backoff<T, E, F, Fut>(
    what: &str,
    config: &BackoffConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(what, attempt, "Retry cancelled");
                return Err(RetryError::Cancelled);
            }
            result = operation(attempt) => result,
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(what, attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(what, attempt, error = %e, "Giving up");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                tracing::debug!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt {attempt} failed, backing off",
                );
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
