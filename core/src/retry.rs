//! Bounded, immediate retries around a single call.
//!
//! `max_attempts` counts every attempt including the first, so the default
//! policy makes at most three round-trips. Retries happen back to back with
//! no delay; the call context is checked before each one.

use crate::context::CallContext;
use crate::error::Error;

/// Default number of attempts per call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// How many times one logical operation may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, initial try included. Zero is treated as one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// A single attempt.
    pub fn no_retries() -> Self {
        Self { max_attempts: 1 }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts.
///
/// `operation` receives the 1-based attempt number. The error from the last
/// attempt is returned unchanged.
///
/// # Errors
///
/// The first non-retryable error, the error of the final attempt, or a
/// cancellation/deadline error from `ctx`.
pub fn retry<T, F>(policy: &RetryPolicy, ctx: &CallContext, mut operation: F) -> Result<T, Error>
where
    F: FnMut(u32) -> Result<T, Error>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        ctx.check()?;
        match operation(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(attempt, max_attempts, error = %err, "retryable failure, trying again");
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::warn!(attempt, max_attempts, error = %err, "retry budget exhausted");
                }
                return Err(err);
            }
        }
    }
}
