//! Retry with capped backoff
//!
//! Used inside a single provider call: transient HTTP or API failures are
//! retried a bounded number of times before the provider is considered to
//! have failed. Every backoff sleep races the caller's cancellation token so
//! a shutdown never waits out a queued delay.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Strategy
// ============================================================================

/// How the delay grows between attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// base, 2×base, 4×base, ...
    #[default]
    Exponential,
    /// base, 2×base, 3×base, ...
    Linear,
}

impl BackoffStrategy {
    /// Delay before retry number `retry` (1 = first retry), capped at `max`
    #[must_use]
    pub fn delay(&self, retry: u32, base: Duration, max: Duration) -> Duration {
        let retry = retry.max(1);
        let delay = match self {
            Self::Exponential => base.saturating_mul(2u32.saturating_pow(retry - 1)),
            Self::Linear => base.saturating_mul(retry),
        };
        delay.min(max)
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential => write!(f, "exponential"),
            Self::Linear => write!(f, "linear"),
        }
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Bounded retry policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
    /// Growth strategy
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Set total attempts
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base delay
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the cap on a single delay
    #[must_use]
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Set the growth strategy
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Delay before retry number `retry`
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.strategy.delay(retry, self.base_delay, self.max_backoff)
    }
}

// ============================================================================
// Retry Loop
// ============================================================================

/// Why a retried operation gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Cancelled while backing off
    #[error("cancelled during retry backoff")]
    Cancelled,

    /// The operation returned an error that must not be retried
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed
    #[error("all {attempts} retry attempts failed, last error: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last: E,
    },
}

impl<E> RetryError<E> {
    /// The underlying operation error, if any
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::Permanent(e) | Self::Exhausted { last: e, .. } => Some(e),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
///
/// `operation` receives the 1-based attempt number. `is_retryable` decides
/// whether an error is worth another attempt.
///
/// # Errors
///
/// Returns [`RetryError::Cancelled`] if the token fires during a backoff,
/// [`RetryError::Permanent`] for a non-retryable error, and
/// [`RetryError::Exhausted`] once every attempt has failed.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
    is_retryable: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(RetryError::Permanent(e)),
            Err(e) if attempt >= attempts => {
                return Err(RetryError::Exhausted { attempts, last: e });
            }
            Err(e) => {
                let backoff = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Attempt failed, retrying after backoff"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                    () = tokio::time::sleep(backoff) => {}
                }
                attempt += 1;
            }
        }
    }
}
