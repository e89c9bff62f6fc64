//! Classifier Core - Layered QoS Classification for NBAR Protocols
//!
//! This crate decides the Quality-of-Service class of protocol names reported
//! by NBAR. Cheap static knowledge answers first; an external AI service is
//! consulted, in rate-limited batches, only for names no other layer knows.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          nbar-classifier                         │
//! │             (reads protocol list, renders text / cisco)          │
//! └────────────────────────────────┬─────────────────────────────────┘
//!                                  │ resolve / apply_defaults
//! ┌────────────────────────────────┼─────────────────────────────────┐
//! │                         CLASSIFIER CORE                          │
//! │  ┌─────────────────────────────┴──────────────────────────────┐  │
//! │  │                        Orchestrator                         │  │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────────┐  ┌─────────┐ │  │
//! │  │  │  Cache   │  │  Rules   │  │ Rate Limiter │  │Providers│ │  │
//! │  │  │ TTL/LRU  │  │table+re  │  │ token bucket │  │+breakers│ │  │
//! │  │  └────┬─────┘  └──────────┘  └──────────────┘  └────┬────┘ │  │
//! │  └───────┼──────────────────────────────────────────────┼──────┘  │
//! └──────────┼──────────────────────────────────────────────┼─────────┘
//!            ▼                                              ▼
//!      cache file (json / gzip)                  chat completions API
//! ```
//!
//! # Key Types
//!
//! - [`Orchestrator`]: The pipeline that combines every layer
//! - [`Classification`]: One protocol's class, confidence and provenance
//! - [`QosClass`]: The closed set of QoS classes
//! - [`CacheStore`]: Persistent TTL + LRU cache
//! - [`RuleEngine`]: Predefined table and custom pattern rules
//! - [`ProviderSet`]: Primary AI provider plus fallbacks
//!
//! # Quick Start
//!
//! ```ignore
//! use classifier_core::{config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_config()?;
//!     let orchestrator = Orchestrator::from_config(&config).await?;
//!
//!     let protocols = vec!["zoom".to_string(), "mystery-app".to_string()];
//!     let resolution = orchestrator.resolve(&protocols, &CancellationToken::new()).await;
//!     let classifications = orchestrator.apply_defaults(resolution);
//!
//!     orchestrator.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`qos`]: Classes, classifications and protocol name helpers
//! - [`rules`]: Predefined table and custom rules
//! - [`cache`]: In-memory cache and its file format
//! - [`resilience`]: Token bucket, circuit breaker and retry backoff
//! - [`provider`]: AI backends, prompt and response parsing
//! - [`orchestrator`]: The resolution pipeline
//! - [`config`]: TOML + environment configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod provider;
pub mod qos;
pub mod resilience;
pub mod rules;

// Re-exports for convenience
pub use cache::{CacheEntry, CacheError, CacheSettings, CacheStats, CacheStore};
pub use config::{ClassifierConfig, ConfigError, ConfigOverrides, ConfigSource};
pub use orchestrator::{ClassifyError, ClassifyOutcome, Orchestrator, Resolution};
pub use provider::{
    ClassificationProvider, ProviderError, ProviderKind, ProviderSet, ProviderStatus,
    RateLimitDescriptor,
};
pub use qos::{Classification, ClassificationSource, QosClass, QosError};
pub use resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimiter,
    RateLimiterConfig,
};
pub use rules::{Rule, RuleEngine, RuleError};
