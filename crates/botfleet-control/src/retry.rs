//! Bounded polling and retry.
//!
//! All waiting in the orchestrator goes through [`RetryPolicy`]: a hard
//! attempt ceiling plus a delay schedule. Nothing loops unboundedly.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::cloud::PollResult;
use crate::error::{ControlError, ControlResult};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay every time.
    Fixed,
    /// Delay doubles after each failure, capped.
    Exponential {
        /// Longest delay between two attempts.
        cap: Duration,
    },
}

/// Attempt ceiling plus delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub interval: Duration,
    /// How the delay evolves.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy with a constant delay.
    #[must_use]
    pub const fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: Backoff::Fixed,
        }
    }

    /// Policy with a doubling delay capped at `cap`.
    #[must_use]
    pub const fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            interval: base,
            backoff: Backoff::Exponential { cap },
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { cap } => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.interval.saturating_mul(1u32 << exponent).min(cap)
            }
        }
    }

    /// Total time spent sleeping if every attempt is used.
    #[must_use]
    pub fn worst_case_wait(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|attempt| self.delay_after(attempt))
            .sum()
    }

    /// Poll `check` until the resource leaves its transitional state.
    ///
    /// Returns the first [`PollResult::Complete`] or [`PollResult::NotFound`].
    /// After `max_attempts` consecutive [`PollResult::InProgress`] answers,
    /// each followed by a delay, fails with [`ControlError::PollTimeout`].
    /// Errors from `check` are returned as-is.
    pub async fn poll<F, Fut>(&self, resource: &str, mut check: F) -> ControlResult<PollResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ControlResult<PollResult>>,
    {
        let mut waited = Duration::ZERO;

        for attempt in 1..=self.max_attempts {
            match check().await? {
                PollResult::InProgress => {
                    let delay = self.delay_after(attempt);
                    debug!(
                        resource,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis(),
                        "update in progress, waiting"
                    );
                    tokio::time::sleep(delay).await;
                    waited += delay;
                }
                settled => {
                    debug!(resource, attempt, result = ?settled, "resource settled");
                    return Ok(settled);
                }
            }
        }

        Err(ControlError::PollTimeout {
            resource: resource.to_owned(),
            attempts: self.max_attempts,
            waited,
        })
    }

    /// Run `op` until it succeeds, retrying transient failures.
    ///
    /// Errors for which [`ControlError::is_transient`] is false are returned
    /// immediately. The last transient error is returned once attempts run
    /// out.
    pub async fn retry<T, F, Fut>(&self, operation: &str, mut op: F) -> ControlResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ControlResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Polling behaviour for transitional resource states.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Status checks before giving up.
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,

    /// Seconds between status checks.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

const fn default_poll_attempts() -> u32 {
    12
}

const fn default_poll_interval_secs() -> u64 {
    10
}

impl PollingConfig {
    /// Build the polling policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_secs(self.interval_secs))
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_poll_attempts(),
            interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Retry behaviour for the function update path.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts including the first.
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure, in seconds.
    #[serde(default = "default_retry_base_secs")]
    pub base_delay_secs: u64,

    /// Upper bound on the delay, in seconds.
    #[serde(default = "default_retry_max_secs")]
    pub max_delay_secs: u64,
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_retry_base_secs() -> u64 {
    4
}

const fn default_retry_max_secs() -> u64 {
    10
}

impl RetryConfig {
    /// Build the retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_secs(self.base_delay_secs),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_secs: default_retry_base_secs(),
            max_delay_secs: default_retry_max_secs(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::cloud::CloudError;

    #[test]
    fn exponential_delays_double_up_to_cap() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy.delay_after(1), Duration::from_secs(4));
        assert_eq!(policy.delay_after(2), Duration::from_secs(8));
        assert_eq!(policy.delay_after(3), Duration::from_secs(10));
        assert_eq!(policy.delay_after(40), Duration::from_secs(10));
    }

    #[test]
    fn default_poll_ceiling_is_two_minutes() {
        let policy = PollingConfig::default().policy();
        assert_eq!(policy.worst_case_wait(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_returns_once_settled() {
        let checks = AtomicU32::new(0);
        let counter = &checks;
        let policy = RetryPolicy::fixed(12, Duration::from_secs(10));
        let start = Instant::now();

        let result = policy
            .poll("fn", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(PollResult::InProgress)
                } else {
                    Ok(PollResult::Complete)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, PollResult::Complete);
        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_gives_up_after_exact_ceiling() {
        let checks = AtomicU32::new(0);
        let counter = &checks;
        let policy = RetryPolicy::fixed(12, Duration::from_secs(10));
        let start = Instant::now();

        let err = policy
            .poll("fn", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(PollResult::InProgress)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ControlError::PollTimeout { attempts: 12, waited, .. } if waited == Duration::from_secs(120)
        ));
        assert_eq!(checks.load(Ordering::SeqCst), 12);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_treats_not_found_as_settled() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
        let result = policy
            .poll("fn", || async { Ok(PollResult::NotFound) })
            .await
            .unwrap();
        assert_eq!(result, PollResult::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_errors() {
        let policy = RetryConfig::default().policy();
        let start = Instant::now();

        let value = policy
            .retry("update", |attempt| async move {
                if attempt < 3 {
                    Err(ControlError::cloud(
                        "update_code",
                        CloudError::Transient("throttled".into()),
                    ))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4 + 8));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryConfig::default().policy();

        let err = policy
            .retry("update", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ControlError::cloud(
                    "update_code",
                    CloudError::Transient("throttled".into()),
                ))
            })
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_does_not_repeat_terminal_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryConfig::default().policy();

        let err = policy
            .retry("update", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ControlError::cloud(
                    "update_code",
                    CloudError::Terminal("access denied".into()),
                ))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::TerminalCloud { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
