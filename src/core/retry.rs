//! Retry logic with exponential backoff
//!
//! The delay before retry `n` (1-indexed) is `base * multiplier^(n-1)`,
//! capped at `max_delay`. Sleeps race against a cancellation token so a
//! cancelled distribution stops waiting immediately.

use crate::core::config::duration_serde;
use crate::core::error::{DistributionError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff parameters shared by every retry loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "duration_serde")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_serde")]
    pub max_delay: Duration,
    /// Growth factor applied per retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay to wait before the given 1-indexed retry attempt
    ///
    /// The multiplier is applied by repeated multiplication so fractional
    /// multipliers round the same way at every step.
    ///
    /// # Examples
    ///
    /// ```
    /// use release_distributor::core::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy {
    ///     max_retries: 5,
    ///     base_delay: Duration::from_millis(100),
    ///     max_delay: Duration::from_secs(1),
    ///     multiplier: 2.0,
    /// };
    ///
    /// assert_eq!(policy.backoff(1), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(2), Duration::from_millis(200));
    /// assert_eq!(policy.backoff(10), Duration::from_secs(1));
    /// ```
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let max_nanos = self.max_delay.as_nanos() as f64;
        let mut nanos = self.base_delay.as_nanos() as f64;
        for _ in 1..attempt {
            if nanos >= max_nanos || nanos <= 0.0 || self.multiplier == 1.0 {
                break;
            }
            nanos = (nanos * self.multiplier).round();
        }

        if !nanos.is_finite() || nanos >= max_nanos {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }
}

/// Sleep for `duration` unless the token is cancelled first
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(DistributionError::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

/// Await `future` unless the token is cancelled first
pub async fn run_or_cancel<F, T>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(DistributionError::Cancelled),
        result = future => result,
    }
}

/// Retry manager for executing operations with exponential backoff
///
/// # Examples
///
/// ```no_run
/// use release_distributor::core::{RetryManager, RetryPolicy};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> release_distributor::core::Result<()> {
/// let manager = RetryManager::new(RetryPolicy::default());
/// let cancel = CancellationToken::new();
///
/// let value = manager
///     .retry(&cancel, "example", |_attempt| async { Ok(42) })
///     .await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `operation` up to `max_retries + 1` times
    ///
    /// The closure receives the 0-indexed attempt number. Cancellation during
    /// a backoff sleep returns [`DistributionError::Cancelled`] unwrapped.
    /// Exhausted or non-retryable failures are wrapped in
    /// [`DistributionError::RetriesExhausted`].
    pub async fn retry<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        label: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt);
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                debug!(target: "retry", label, attempt, delay_ms, "backing off");
                sleep_or_cancel(cancel, delay).await?;
            }

            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(DistributionError::Cancelled) => return Err(DistributionError::Cancelled),
                Err(error) => {
                    if attempt >= self.policy.max_retries || !error.is_retryable() {
                        return Err(DistributionError::RetriesExhausted {
                            publisher: label.to_string(),
                            attempts: attempt + 1,
                            source: Box::new(error),
                        });
                    }
                    let max_attempts = self.policy.max_retries + 1;
                    warn!(
                        target: "retry",
                        label,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %error,
                        "attempt failed, retrying"
                    );
                }
            }
            attempt += 1;
        }
    }
}
