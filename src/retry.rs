//! Bounded retry with exponential backoff for remote capability calls.
//!
//! Embedding and completion providers wrap each HTTP request in
//! [`RetryPolicy::run`]. After the budget is exhausted the last error is
//! returned to the caller unchanged.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;

/// Retry budget and backoff schedule.
///
/// The wait before attempt `n + 1` is `initial_backoff * multiplier^(n - 1)`,
/// clamped to `max_backoff`.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Must be at least 1. Default: 3
    pub max_attempts: u32,
    /// Wait after the first failure. Default: 1 s
    pub initial_backoff: Duration,
    /// Upper bound on any single wait. Default: 10 s
    pub max_backoff: Duration,
    /// Growth factor between waits. Default: 2.0
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// A policy with `max_attempts` and no waiting, for tests and local
    /// providers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Wait inserted after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Runs `op` until it succeeds or the attempt budget is spent.
    ///
    /// `label` only appears in log events.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < attempts => {
                    let wait = self.backoff_after(attempt);
                    warn!(
                        label,
                        attempt,
                        total = attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Remote call failed, retrying"
                    );
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!(label, attempts, error = %err, "Remote call failed, giving up");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlaybookError;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(4));
        // Clamped to max_backoff
        assert_eq!(policy.backoff_after(10), Duration::from_secs(10));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::immediate(3);
        let mut calls = 0;
        let value = policy
            .run("test", || {
                calls += 1;
                if calls < 3 {
                    Err(PlaybookError::embedding("flaky"))
                } else {
                    Ok(calls)
                }
            })
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_budget() {
        let policy = RetryPolicy::immediate(2);
        let mut calls = 0;
        let err = policy
            .run::<(), _>("test", || {
                calls += 1;
                Err(PlaybookError::completion("down"))
            })
            .unwrap_err();
        assert!(err.is_completion());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_no_retry_calls_once() {
        let mut calls = 0;
        let _ = RetryPolicy::no_retry().run::<(), _>("test", || {
            calls += 1;
            Err(PlaybookError::embedding("nope"))
        });
        assert_eq!(calls, 1);
    }
}
