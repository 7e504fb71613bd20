//! Retry with backoff for remote calls
//!
//! Wraps `backoff::future::retry_notify` with an attempt budget instead of
//! an elapsed-time budget. Delays carry no jitter.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::future::retry_notify;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Delay growth between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffShape {
    /// Same delay before every retry
    Fixed,
    /// Delay doubles after every failed attempt
    Exponential,
}

impl BackoffShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffShape::Fixed => "fixed",
            BackoffShape::Exponential => "exponential",
        }
    }
}

/// Retry policy for one call path
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub shape: BackoffShape,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms);
        match self.shape {
            BackoffShape::Fixed => base,
            BackoffShape::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }

    /// Worst-case time spent sleeping between attempts
    pub fn total_delay(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }
}

/// `Backoff` that hands out `max_attempts - 1` delays, then gives up
#[derive(Debug)]
struct AttemptBudget {
    policy: RetryPolicy,
    failures: u32,
}

impl AttemptBudget {
    fn new(policy: RetryPolicy) -> Self {
        Self { policy, failures: 0 }
    }
}

impl Backoff for AttemptBudget {
    fn reset(&mut self) {
        self.failures = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.delay_after(self.failures))
    }
}

/// Runs an operation under a retry policy
///
/// Every `execute` call starts a fresh attempt counter, so concurrent calls
/// share no backoff state. Only errors for which [`Error::is_retryable`]
/// holds are retried; the last error is returned unchanged once the budget
/// is spent.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        retry_notify(
            AttemptBudget::new(self.policy.clone()),
            || {
                attempt += 1;
                let current = attempt;
                let fut = op();
                async move {
                    fut.await.map_err(|e| {
                        if e.is_retryable() {
                            debug!("{} attempt {} failed: {}", operation, current, e);
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
                }
            },
            |e: Error, wait: Duration| {
                warn!("{} failed ({}), retrying in {:?}", operation, e, wait);
            },
        )
        .await
    }
}
