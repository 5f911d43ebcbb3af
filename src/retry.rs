//! Retry with exponential backoff and jitter.
//!
//! Operations arrive already normalized (the pipeline wraps the raw thunk
//! with [`DomainError::normalize`] before retrying), so retryability here is
//! a matter of reading the error, not re-deriving it.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{DomainError, ErrorCode, Result};

/// Retry policy: pure configuration, no lifecycle.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Statuses retried even when the error itself is marked non-retryable.
    pub retryable_statuses: HashSet<u16>,
    /// Codes retried even when the error itself is marked non-retryable.
    pub retryable_codes: HashSet<ErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            retryable_statuses: HashSet::new(),
            retryable_codes: HashSet::new(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn retry_on_status(mut self, status: u16) -> Self {
        self.retryable_statuses.insert(status);
        self
    }

    pub fn retry_on_code(mut self, code: ErrorCode) -> Self {
        self.retryable_codes.insert(code);
        self
    }

    /// Whether a failed attempt (0-indexed) should be retried.
    pub fn should_retry(&self, error: &DomainError, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        error.retryable
            || error
                .status
                .is_some_and(|s| self.retryable_statuses.contains(&s))
            || self.retryable_codes.contains(&error.code)
    }

    /// Delay before the retry following attempt `attempt` (0-indexed):
    /// `min(base × multiplier^attempt, max)` adjusted by ±25 % uniform
    /// jitter, floored at zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self.backoff_multiplier.powi(attempt as i32);
        let raw = self.base_delay.as_secs_f64() * exponential;
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }
}

/// Retry an async operation with exponential backoff.
///
/// Executes the operation up to `max_retries + 1` times; exhausting retries
/// returns the last error unchanged.
pub async fn retry_async<F, Fut, T>(mut operation: F, policy: &RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(error) => {
                if !policy.should_retry(&error, attempt) {
                    if attempt >= policy.max_retries && attempt > 0 {
                        warn!(
                            max_retries = policy.max_retries,
                            code = %error.code,
                            "retries exhausted: {}",
                            error.message
                        );
                    } else {
                        debug!(code = %error.code, "non-retryable error: {}", error.message);
                    }
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    code = %error.code,
                    "attempt failed, retrying: {}",
                    error.message
                );
                sleep(delay).await;
            }
        }
    }
}
