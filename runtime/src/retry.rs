//! Retry policies for transient failures.
//!
//! A [`RetryPolicy`] describes how many times to retry and how long to wait
//! before each retry. Retries are evenly spaced; optional jitter spreads
//! concurrent retriers apart, as used by the booking conflict loop.
//!
//! # Example
//!
//! ```rust
//! use bookwell_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::fixed(5, Duration::from_millis(100)).with_jitter();
//!
//! let value = retry_with_predicate(
//!     policy,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("transient"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: usize,
    /// Delay before each retry
    pub interval: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl RetryPolicy {
    /// Evenly spaced retries: `max_retries` attempts, `interval` apart.
    #[must_use]
    pub const fn fixed(max_retries: usize, interval: Duration) -> Self {
        Self {
            max_retries,
            interval,
            jitter: false,
        }
    }

    /// Same policy with jittered delays.
    #[must_use]
    pub const fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// True while `retries_so_far` is below the limit.
    #[must_use]
    pub const fn should_retry(&self, retries_so_far: usize) -> bool {
        retries_so_far < self.max_retries
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// Spacing does not grow with `attempt`; the argument only keys the log.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if !self.jitter {
            return self.interval;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        tracing::trace!(attempt, factor, "Jittered retry delay");
        self.interval.mul_f64(factor)
    }
}

/// Retry an async operation while `is_retryable` holds for its error.
///
/// Non-retryable errors return immediately. Once the policy is exhausted the
/// last error is returned.
///
/// # Errors
///
/// Returns the operation's error when it is not retryable or when all
/// retries are exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                    metrics::counter!("retry_successes_total").increment(1);
                }
                return Ok(result);
            },
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(error = %err, "Error is not retryable, failing immediately");
                    return Err(err);
                }

                if !policy.should_retry(attempt) {
                    tracing::warn!(attempt, error = %err, "Operation failed after max retries");
                    metrics::counter!("retry_exhausted_total").increment(1);
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying"
                );
                metrics::counter!("retry_attempts_total").increment(1);

                sleep(delay).await;
                attempt += 1;
            },
        }
    }
}
