//! Token-Bucket Rate Limiting for AI Requests
//!
//! Every outbound AI request takes one token. The bucket holds up to
//! `burst_size` tokens and starts full, so a short burst goes out
//! immediately; after that requests are admitted at `requests_per_minute`.
//!
//! # Design
//!
//! - Tokens are permits on a fair [`tokio::sync::Semaphore`], so waiters are
//!   served in arrival order and starvation is bounded
//! - A background task owned by the limiter adds one permit every
//!   `60s / requests_per_minute`, dropping it if the bucket is already full
//! - [`RateLimiter::wait`] races the caller's [`CancellationToken`]; a
//!   cancelled wait leaves nothing behind
//! - The refill task stops on [`RateLimiter::shutdown`] or when the limiter
//!   is dropped
//!
//! # Usage
//!
//! ```no_run
//! use classifier_core::resilience::{RateLimiter, RateLimiterConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), classifier_core::resilience::RateLimitError> {
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::new()
//!         .with_requests_per_minute(30)
//!         .with_burst_size(5),
//! );
//! let cancel = CancellationToken::new();
//! limiter.wait(&cancel).await?;
//! // ... issue the request
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Configuration
// =============================================================================

/// Token bucket parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Steady-state admission rate
    pub requests_per_minute: u32,

    /// Bucket capacity; also the initial token count
    pub burst_size: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

impl RateLimiterConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requests per minute
    #[must_use]
    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    /// Set the burst size
    #[must_use]
    pub fn with_burst_size(mut self, size: u32) -> Self {
        self.burst_size = size;
        self
    }

    /// Time between two refills
    #[must_use]
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs(60) / self.requests_per_minute.max(1)
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors from waiting on the limiter
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// The caller cancelled while waiting for a token
    #[error("rate limit wait cancelled")]
    Cancelled,

    /// The limiter was shut down
    #[error("rate limiter is shut down")]
    Closed,
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of limiter activity
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    /// Configured rate
    pub requests_per_minute: u32,
    /// Configured capacity
    pub burst_size: u32,
    /// Tokens currently in the bucket
    pub available_tokens: usize,
    /// Calls to `wait` and successful `try_acquire`
    pub total_requests: u64,
    /// Cancelled waits and refused `try_acquire`
    pub blocked_requests: u64,
    /// Time spent inside `wait`
    pub total_wait: Duration,
    /// `total_wait / total_requests`
    pub average_wait: Duration,
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Token bucket shared by all outbound AI requests
pub struct RateLimiter {
    config: RateLimiterConfig,
    tokens: Arc<Semaphore>,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    total_wait_micros: AtomicU64,
    shutdown: CancellationToken,
    refill_task: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a full bucket and start its refill task
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = config.burst_size.max(1) as usize;
        let tokens = Arc::new(Semaphore::new(capacity));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(refill_loop(
            Arc::clone(&tokens),
            capacity,
            config.refill_interval(),
            shutdown.clone(),
        ));

        tracing::debug!(
            rpm = config.requests_per_minute,
            burst = capacity,
            "Rate limiter started"
        );

        Self {
            config,
            tokens,
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            total_wait_micros: AtomicU64::new(0),
            shutdown,
            refill_task: Mutex::new(Some(task)),
        }
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait for a token
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Cancelled`] if `cancel` fires first, and
    /// [`RateLimitError::Closed`] once the limiter has been shut down.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RateLimitError::Cancelled),
            permit = self.tokens.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                Err(_) => Err(RateLimitError::Closed),
            },
        };

        let waited = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_wait_micros.fetch_add(waited, Ordering::Relaxed);
        if result.is_err() {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = ?result, "Rate limit wait aborted");
        }

        result
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        match self.tokens.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.total_requests.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Tokens currently in the bucket
    #[must_use]
    pub fn available_tokens(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_wait = Duration::from_micros(self.total_wait_micros.load(Ordering::Relaxed));
        let average_wait = if total_requests == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(
                self.total_wait_micros.load(Ordering::Relaxed) / total_requests,
            )
        };

        RateLimiterStats {
            requests_per_minute: self.config.requests_per_minute,
            burst_size: self.config.burst_size,
            available_tokens: self.available_tokens(),
            total_requests,
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            total_wait,
            average_wait,
        }
    }

    /// Zero the counters
    pub fn reset_stats(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.blocked_requests.store(0, Ordering::Relaxed);
        self.total_wait_micros.store(0, Ordering::Relaxed);
    }

    /// Stop refilling and wake every waiter with [`RateLimitError::Closed`]
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.tokens.close();
        if let Some(task) = self.refill_task.lock().take() {
            task.abort();
        }
        tracing::debug!("Rate limiter stopped");
    }

    /// Whether [`RateLimiter::shutdown`] has been called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("available_tokens", &self.available_tokens())
            .finish_non_exhaustive()
    }
}

/// Add one token per period until shut down
async fn refill_loop(
    tokens: Arc<Semaphore>,
    capacity: usize,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                // Only this task adds permits, so the check cannot race past capacity.
                if tokens.available_permits() < capacity {
                    tokens.add_permits(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rpm: u32, burst: u32) -> RateLimiter {
        RateLimiter::new(
            RateLimiterConfig::new()
                .with_requests_per_minute(rpm)
                .with_burst_size(burst),
        )
    }

    // =========================================================================
    // Configuration Tests
    // =========================================================================

    #[test]
    fn test_config_defaults() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.requests_per_minute, 60);
        assert_eq!(config.burst_size, 10);
        assert_eq!(config.refill_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_refill_interval() {
        let config = RateLimiterConfig::new().with_requests_per_minute(120);
        assert_eq!(config.refill_interval(), Duration::from_millis(500));

        let zero = RateLimiterConfig::new().with_requests_per_minute(0);
        assert_eq!(zero.refill_interval(), Duration::from_secs(60));
    }

    // =========================================================================
    // Admission Tests
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_burst_admitted_immediately() {
        let limiter = limiter(60, 3);
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let waits = (0..3).map(|_| limiter.wait(&cancel));
        let results = futures::future::join_all(waits).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(limiter.available_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_after_burst_waits_for_refill() {
        let limiter = limiter(60, 3);
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            limiter.wait(&cancel).await.unwrap();
        }

        let blocked = tokio::time::timeout(Duration::from_millis(500), limiter.wait(&cancel)).await;
        assert!(blocked.is_err(), "fourth request should still be waiting");

        let started = Instant::now();
        limiter.wait(&cancel).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));

        // The timed-out wait was dropped before it could be counted.
        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_never_exceeds_capacity() {
        let limiter = limiter(60, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(limiter.available_tokens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_drains_bucket() {
        let limiter = limiter(60, 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.blocked_requests, 1);
    }

    // =========================================================================
    // Cancellation and Shutdown Tests
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_returns_error() {
        let limiter = limiter(1, 1);
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = limiter.wait(&cancel).await;
        assert_eq!(result, Err(RateLimitError::Cancelled));
        assert_eq!(limiter.stats().blocked_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_does_not_consume_token() {
        let limiter = limiter(60, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(limiter.wait(&cancel).await, Err(RateLimitError::Cancelled));
        assert_eq!(limiter.available_tokens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_wakes_waiters() {
        let limiter = Arc::new(limiter(1, 1));
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.wait(&cancel).await })
        };
        tokio::task::yield_now().await;

        limiter.shutdown();
        assert!(limiter.is_shut_down());
        assert_eq!(waiter.await.unwrap(), Err(RateLimitError::Closed));
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let limiter = limiter(60, 2);
        assert!(limiter.try_acquire());
        limiter.reset_stats();
        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.average_wait, Duration::ZERO);
    }
}
