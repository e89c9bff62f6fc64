//! Per-provider Circuit Breaker
//!
//! ```text
//! +--------+   max_failures    +------+   reset_timeout   +-----------+
//! | Closed | ----------------> | Open | ----------------> | Half-Open |
//! +--------+                   +------+                   +-----------+
//!     ^                           ^          failure           |
//!     |                           +----------------------------+
//!     |                       success                          |
//!     +--------------------------------------------------------+
//! ```
//!
//! - **Closed**: calls pass through; consecutive failures are counted
//! - **Open**: calls are rejected with [`CircuitError::Open`] without running
//! - **Half-Open**: exactly one probe call is let through
//!
//! The state check, the call, and the outcome recording form one unit: a
//! caller first obtains a [`CallPermit`], runs the call, then reports the
//! outcome on the permit. A probe permit dropped without an outcome (the call
//! was cancelled) puts the breaker back to open without counting a failure;
//! the reset timeout has already elapsed, so the next call probes again.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

// ============================================================================
// Configuration
// ============================================================================

/// Breaker thresholds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub max_failures: u32,

    /// How long the circuit stays open before a probe is allowed
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the failure threshold
    #[must_use]
    pub fn with_max_failures(mut self, max: u32) -> Self {
        self.max_failures = max;
        self
    }

    /// Set the open duration
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

// ============================================================================
// State
// ============================================================================

/// Circuit breaker state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,

    /// Rejecting calls
    Open,

    /// Letting one probe through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Error returned by [`CircuitBreaker::call`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CircuitError<E> {
    /// The call was rejected without running
    #[error("circuit breaker is open")]
    Open,

    /// The call ran and failed
    #[error("{0}")]
    Inner(E),
}

/// Snapshot of breaker activity
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// Name of the guarded provider
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    /// Time since the most recent failure
    pub since_last_failure: Option<Duration>,
    /// Calls that completed successfully
    pub total_successes: u64,
    /// Calls that completed with a failure
    pub total_failures: u64,
    /// Calls rejected while open
    pub rejected_calls: u64,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Failure-tracking gate in front of one provider
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::default()),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    /// Name used in logs
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures since the last success
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Whether a call would currently be rejected
    #[must_use]
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => false,
            CircuitState::Open => !self.timeout_elapsed(&inner),
            CircuitState::HalfOpen => inner.probe_in_flight,
        }
    }

    /// Ask to run one call
    ///
    /// Returns `None` when the circuit rejects the call. The returned permit
    /// must be completed with [`CallPermit::success`] or
    /// [`CallPermit::failure`] once the call has finished.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        let probe = match state {
            CircuitState::Closed => false,
            CircuitState::Open if self.timeout_elapsed(&inner) => {
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                tracing::info!(breaker = %self.name, "Circuit half-open, sending probe");
                true
            }
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                drop(inner);
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(breaker = %self.name, "Circuit open, call rejected");
                return None;
            }
        };

        Some(CallPermit {
            breaker: self,
            probe,
            completed: false,
        })
    }

    /// Run `f` through the breaker, counting every error as a failure
    ///
    /// # Errors
    ///
    /// Returns [`CircuitError::Open`] without calling `f` if the circuit is
    /// open, or [`CircuitError::Inner`] with the error `f` produced.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or(CircuitError::Open)?;
        match f().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerState::default();
        tracing::info!(breaker = %self.name, "Circuit reset");
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            since_last_failure: inner.last_failure_at.map(|at| at.elapsed()),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    fn timeout_elapsed(&self, inner: &BreakerState) -> bool {
        match inner.last_failure_at {
            Some(at) => at.elapsed() >= self.config.reset_timeout,
            None => true,
        }
    }

    /// Record a successful call made outside [`CircuitBreaker::call`]
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, from = %inner.state, "Circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
    }

    /// Record a failed call made outside [`CircuitBreaker::call`]
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());

        let state = inner.state;
        match state {
            CircuitState::Closed if inner.consecutive_failures >= self.config.max_failures => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.consecutive_failures,
                    reset_timeout_secs = self.config.reset_timeout.as_secs(),
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                tracing::warn!(breaker = %self.name, "Probe failed, circuit re-opened");
            }
            _ => {}
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.probe_in_flight = false;
        }
    }
}

// ============================================================================
// Call Permit
// ============================================================================

/// Admission for one call through a [`CircuitBreaker`]
#[must_use = "a permit must be completed with success() or failure()"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    completed: bool,
}

impl CallPermit<'_> {
    /// Whether this call is the half-open probe
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record a successful call
    pub fn success(mut self) {
        self.completed = true;
        self.breaker.record_success();
    }

    /// Record a failed call
    pub fn failure(mut self) {
        self.completed = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.completed && self.probe {
            self.breaker.release_probe();
        }
    }
}
