//! Classification Orchestrator
//!
//! Ties the layers together. For each protocol the first layer with an
//! answer wins:
//!
//! ```text
//!                    ┌───────────┐ hit
//!  protocol ───────► │   cache   │ ─────────────────────────────► result
//!                    └─────┬─────┘
//!                          │ miss
//!                    ┌─────▼─────┐ predefined / custom rule
//!                    │   rules   │ ─────────────── cache ───────► result
//!                    └─────┬─────┘
//!                          │ default
//!                    ┌─────▼─────┐   batches   ┌──────────────┐
//!                    │ AI resolve│ ──────────► │ rate limiter │
//!                    └───────────┘             └──────┬───────┘
//!                                                     ▼
//!                                              provider set (+ breakers)
//!                                                     │
//!                          confident answers cached ◄─┘
//!
//!  still unresolved ──► apply_defaults (explicit, by the caller)
//! ```
//!
//! A failed batch never aborts the run: it is reported in the returned
//! errors and its protocols stay unresolved.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheError, CacheStore};
use crate::config::ClassifierConfig;
use crate::provider::{ProviderError, ProviderSet, ProviderStatus};
use crate::qos::{normalize_protocol, validate_protocol_name, Classification, ClassificationSource};
use crate::resilience::{RateLimiter, RateLimiterConfig};
use crate::rules::RuleEngine;

// ============================================================================
// Errors and Results
// ============================================================================

/// Per-run errors; none of them aborts the process
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Cancelled while waiting for a rate limit token; remaining batches
    /// were not attempted
    #[error("cancelled while waiting for rate limiter")]
    RateLimitCancelled,

    /// Cancelled during a provider call
    #[error("classification cancelled")]
    Cancelled,

    /// Every provider failed for a batch
    #[error("all providers failed for batch {batch}: {last_error}")]
    AllProvidersFailed {
        /// Zero-based batch index
        batch: usize,
        /// Error of the last provider tried
        #[source]
        last_error: ProviderError,
    },

    /// A provider answered but nothing usable could be parsed
    #[error("malformed response from {provider} for batch {batch}")]
    MalformedResponse {
        /// Provider that answered
        provider: String,
        /// Zero-based batch index
        batch: usize,
    },
}

/// Result of [`Orchestrator::classify_protocols`]
#[derive(Debug, Default)]
pub struct ClassifyOutcome {
    /// AI classifications, `source = ai`
    pub classifications: HashMap<String, Classification>,
    /// Soft errors, in batch order
    pub errors: Vec<ClassifyError>,
}

/// Result of [`Orchestrator::resolve`]
#[derive(Debug, Default)]
pub struct Resolution {
    /// Resolved protocols
    pub classifications: HashMap<String, Classification>,
    /// Protocols no layer could classify, in input order
    pub unresolved: Vec<String>,
    /// Soft errors from the AI layer
    pub errors: Vec<ClassifyError>,
    /// Answers served from the cache
    pub cache_hits: usize,
    /// Answers from the predefined table or custom rules
    pub rule_hits: usize,
    /// Answers from an AI provider
    pub ai_hits: usize,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Layered classification pipeline
pub struct Orchestrator {
    cache: Arc<CacheStore>,
    rules: RuleEngine,
    providers: ProviderSet,
    limiter: RateLimiter,
    batch_size: usize,
    background: CancellationToken,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Assemble an orchestrator from ready-made parts
    ///
    /// Spawns the cache cleanup task when the cache is enabled, so this must
    /// be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        cache: Arc<CacheStore>,
        rules: RuleEngine,
        providers: ProviderSet,
        limiter: RateLimiter,
        batch_size: usize,
    ) -> Self {
        let background = CancellationToken::new();
        let cleanup_task = cache.is_enabled().then(|| {
            cache.spawn_cleanup(cache.settings().cleanup_interval, background.child_token())
        });

        Self {
            cache,
            rules,
            providers,
            limiter,
            batch_size: batch_size.max(1),
            background,
            cleanup_task: Mutex::new(cleanup_task),
        }
    }

    /// Build every layer from configuration and load the cache file
    ///
    /// A cache that cannot be loaded is logged and started empty.
    ///
    /// # Errors
    ///
    /// Returns the [`ProviderError`] of a primary provider that cannot be
    /// built.
    pub async fn from_config(config: &ClassifierConfig) -> Result<Self, ProviderError> {
        let cache = Arc::new(CacheStore::new(config.cache.clone()));
        if cache.is_enabled() {
            match cache.load().await {
                Ok(loaded) => tracing::info!(
                    entries = loaded,
                    path = %cache.settings().file_path.display(),
                    "Cache loaded"
                ),
                Err(e) => tracing::warn!(error = %e, "Failed to load cache, starting empty"),
            }
        }

        let rules = RuleEngine::from_settings(&config.qos);
        let providers =
            ProviderSet::from_settings(&config.ai, &config.app, config.qos.default_class)?;
        let limiter = RateLimiter::new(
            RateLimiterConfig::new()
                .with_requests_per_minute(config.ai.rate_limit.requests_per_minute)
                .with_burst_size(config.ai.rate_limit.burst_size),
        );

        Ok(Self::new(cache, rules, providers, limiter, config.app.batch_size))
    }

    /// Cache store
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Rule engine
    #[must_use]
    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Rate limiter
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Status of every configured provider
    #[must_use]
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.providers.statuses()
    }

    /// Classify protocols with the AI providers, one rate-limited batch at a
    /// time
    ///
    /// `batch_size` 0 uses the configured batch size. Protocols of failed
    /// batches are simply absent from the result.
    pub async fn classify_protocols(
        &self,
        protocols: &[String],
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> ClassifyOutcome {
        let size = if batch_size == 0 { self.batch_size } else { batch_size };
        let mut outcome = ClassifyOutcome::default();
        if protocols.is_empty() {
            return outcome;
        }

        let batch_count = protocols.len().div_ceil(size);
        tracing::info!(
            protocols = protocols.len(),
            batches = batch_count,
            batch_size = size,
            "Starting AI classification"
        );

        for (index, batch) in protocols.chunks(size).enumerate() {
            if let Err(e) = self.limiter.wait(cancel).await {
                tracing::warn!(batch = index, error = %e, "Rate limiter wait aborted");
                outcome.errors.push(ClassifyError::RateLimitCancelled);
                break;
            }

            match self.providers.classify_batch(batch, cancel).await {
                Ok(result) if result.classifications.is_empty() => {
                    tracing::warn!(
                        provider = %result.provider,
                        batch = index,
                        "No classifications could be parsed from the response"
                    );
                    outcome.errors.push(ClassifyError::MalformedResponse {
                        provider: result.provider,
                        batch: index,
                    });
                }
                Ok(result) => {
                    tracing::info!(
                        provider = %result.provider,
                        batch = index,
                        classified = result.classifications.len(),
                        requested = batch.len(),
                        "Batch classified"
                    );
                    outcome.classifications.extend(
                        result
                            .classifications
                            .into_iter()
                            .map(|(name, c)| (name, c.restamped(ClassificationSource::Ai))),
                    );
                }
                Err(ProviderError::Cancelled) => {
                    tracing::info!(batch = index, "Classification cancelled");
                    outcome.errors.push(ClassifyError::Cancelled);
                    break;
                }
                Err(last_error) => {
                    tracing::error!(batch = index, error = %last_error, "All providers failed for batch");
                    outcome.errors.push(ClassifyError::AllProvidersFailed {
                        batch: index,
                        last_error,
                    });
                }
            }
        }

        outcome
    }

    /// Resolve protocols through the cache, the rules and the AI layer
    ///
    /// Names are validated, lower-cased and de-duplicated. Invalid names are
    /// logged and skipped. Nothing is defaulted here; see
    /// [`Orchestrator::apply_defaults`].
    pub async fn resolve(&self, protocols: &[String], cancel: &CancellationToken) -> Resolution {
        let mut resolution = Resolution::default();
        let use_cache = self.cache.is_enabled();

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for raw in protocols {
            let name = normalize_protocol(raw);
            if let Err(e) = validate_protocol_name(&name) {
                tracing::warn!(protocol = %raw, error = %e, "Skipping invalid protocol name");
                continue;
            }
            if !seen.insert(name.clone()) {
                continue;
            }

            if use_cache {
                if let Some(hit) = self.cache.get(&name) {
                    resolution.cache_hits += 1;
                    resolution.classifications.insert(name, hit);
                    continue;
                }
            }

            let classification = self.rules.classify(&name);
            if classification.source == ClassificationSource::Default {
                pending.push(name);
                continue;
            }
            resolution.rule_hits += 1;
            if use_cache {
                self.cache.set(name.clone(), classification.clone());
            }
            resolution.classifications.insert(name, classification);
        }

        if !pending.is_empty() {
            if self.providers.has_available() {
                let outcome = self.classify_protocols(&pending, 0, cancel).await;
                resolution.ai_hits = outcome.classifications.len();

                if use_cache {
                    let threshold = self.rules.confidence_threshold();
                    let confident: HashMap<_, _> = outcome
                        .classifications
                        .iter()
                        .filter(|(_, c)| c.confidence >= threshold)
                        .map(|(name, c)| (name.clone(), c.clone()))
                        .collect();
                    self.cache.set_batch(confident);
                }

                resolution.classifications.extend(outcome.classifications);
                resolution.errors = outcome.errors;
            } else {
                tracing::info!(
                    unclassified = pending.len(),
                    "No AI provider available, skipping AI classification"
                );
            }
        }

        resolution.unresolved = pending
            .into_iter()
            .filter(|name| !resolution.classifications.contains_key(name))
            .collect();

        tracing::info!(
            cache_hits = resolution.cache_hits,
            rule_hits = resolution.rule_hits,
            ai_hits = resolution.ai_hits,
            unresolved = resolution.unresolved.len(),
            errors = resolution.errors.len(),
            "Resolution finished"
        );
        resolution
    }

    /// Give every unresolved protocol the default classification
    ///
    /// The defaults are cached like any other answer.
    #[must_use]
    pub fn apply_defaults(&self, resolution: Resolution) -> HashMap<String, Classification> {
        let Resolution {
            mut classifications,
            unresolved,
            ..
        } = resolution;

        if unresolved.is_empty() {
            return classifications;
        }

        let defaults: HashMap<String, Classification> = unresolved
            .into_iter()
            .map(|name| {
                let classification = self.rules.default_for(name.as_str());
                (name, classification)
            })
            .collect();

        tracing::info!(
            count = defaults.len(),
            class = %self.rules.default_class(),
            "Applied default classification"
        );

        if self.cache.is_enabled() {
            self.cache.set_batch(defaults.clone());
        }
        classifications.extend(defaults);
        classifications
    }

    /// Stop the background tasks and save the cache
    ///
    /// Returns the number of entries written, 0 when the cache is disabled.
    ///
    /// # Errors
    ///
    /// Returns the [`CacheError`] of a failed save.
    pub async fn shutdown(&self) -> Result<usize, CacheError> {
        self.background.cancel();
        self.limiter.shutdown();

        let cleanup = self.cleanup_task.lock().take();
        if let Some(handle) = cleanup {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Cache cleanup task ended abnormally");
            }
        }

        if !self.cache.is_enabled() {
            return Ok(0);
        }
        let saved = self.cache.save().await?;
        tracing::info!(
            entries = saved,
            path = %self.cache.settings().file_path.display(),
            "Cache saved"
        );
        Ok(saved)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.background.cancel();
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("batch_size", &self.batch_size)
            .field("providers", &self.providers)
            .field("cache_size", &self.cache.size())
            .finish_non_exhaustive()
    }
}
