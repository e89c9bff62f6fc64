//! Admission control and failure isolation for outbound AI calls
//!
//! ```text
//!   batch ──► RateLimiter.wait() ──► CircuitBreaker.call() ──► provider
//!               (token bucket)         (per provider)            │
//!                                                                ▼
//!                                                   retry_with_backoff()
//!                                                   (transient failures)
//! ```
//!
//! # Components
//!
//! - [`RateLimiter`]: token bucket shared by every outbound request, refilled
//!   by a background task owned by the limiter
//! - [`CircuitBreaker`]: closed / open / half-open state machine guarding one
//!   provider
//! - [`RetryPolicy`] and [`retry_with_backoff`]: bounded retries with capped,
//!   cancellable backoff inside a single provider call

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limit;

pub use backoff::{retry_with_backoff, BackoffStrategy, RetryError, RetryPolicy};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitError,
    CircuitState,
};
pub use rate_limit::{RateLimitError, RateLimiter, RateLimiterConfig, RateLimiterStats};
