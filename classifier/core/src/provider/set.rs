//! Ordered Provider Set
//!
//! The primary provider followed by the enabled fallbacks, each with its own
//! optional circuit breaker.
//!
//! # Batch Routing
//!
//! ```text
//! batch ──► primary ──fail──► fallback 1 ──fail──► fallback 2 ──fail──► Err(last)
//!              │                  │                    │
//!              └─ok───────────────┴─ok─────────────────┴─ok──► (provider, results)
//!
//! unavailable provider  → skipped, not a failure
//! breaker open          → counted as that provider failing
//! cancelled             → returned at once, nothing recorded on the breaker
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::chat::{ChatCompletionConfig, ChatCompletionProvider};
use super::stub::UnimplementedProvider;
use super::{ClassificationProvider, ProviderError, ProviderKind, RateLimitDescriptor};
use crate::config::{AiSettings, AppSettings, ProviderSettings};
use crate::qos::{Classification, QosClass};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};

// ============================================================================
// Status
// ============================================================================

/// Point-in-time view of one provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    /// Provider name
    pub name: String,
    /// Backend kind
    pub kind: ProviderKind,
    /// Whether the provider is configured well enough to be called
    pub available: bool,
    /// Breaker state, when a breaker is attached
    pub circuit_state: Option<CircuitState>,
    /// False for the primary
    pub is_fallback: bool,
}

/// Results of a batch and the provider that produced them
#[derive(Debug)]
pub struct BatchResult {
    /// Name of the provider that answered
    pub provider: String,
    /// Classifications for protocols of the batch
    pub classifications: HashMap<String, Classification>,
}

struct ProviderSlot {
    provider: Arc<dyn ClassificationProvider>,
    breaker: Option<CircuitBreaker>,
    is_fallback: bool,
}

// ============================================================================
// Provider Set
// ============================================================================

/// Primary provider and fallbacks, tried in order
pub struct ProviderSet {
    slots: Vec<ProviderSlot>,
}

impl ProviderSet {
    /// Build the set from configuration
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unsupported`] if the primary provider name is
    /// unknown, or [`ProviderError::Http`] if an HTTP client cannot be built.
    /// Unusable fallbacks are logged and skipped.
    pub fn from_settings(
        ai: &AiSettings,
        app: &AppSettings,
        default_class: QosClass,
    ) -> Result<Self, ProviderError> {
        let breaker_config = ai.circuit_breaker.enabled.then(|| {
            CircuitBreakerConfig::default()
                .with_max_failures(ai.circuit_breaker.max_failures)
                .with_reset_timeout(ai.circuit_breaker.reset_timeout)
        });

        let primary_kind: ProviderKind = ai.provider.parse()?;
        let section = ai.providers.get(primary_kind.as_str());
        let primary = ResolvedProvider {
            kind: primary_kind,
            api_key: section
                .and_then(|s| s.api_key.clone())
                .unwrap_or_else(|| ai.api_key.clone()),
            model: section
                .and_then(|s| s.model.clone())
                .unwrap_or_else(|| ai.model.clone()),
            temperature: section.and_then(|s| s.temperature).unwrap_or(ai.temperature),
            max_tokens: section.and_then(|s| s.max_tokens).unwrap_or(ai.max_tokens),
            base_url: section.and_then(|s| s.base_url.clone()),
        };

        let mut slots = vec![ProviderSlot {
            provider: primary.build(ai, app, default_class)?,
            breaker: breaker_config
                .clone()
                .map(|config| CircuitBreaker::new(primary_kind.as_str(), config)),
            is_fallback: false,
        }];

        for fallback in ai.fallback.iter().filter(|f| f.enabled) {
            let kind = match fallback.provider.parse::<ProviderKind>() {
                Ok(kind) => kind,
                Err(e) => {
                    tracing::warn!(provider = %fallback.provider, error = %e, "Skipping fallback provider");
                    continue;
                }
            };
            let Some(section) = ai.providers.get(kind.as_str()) else {
                tracing::warn!(
                    provider = %kind,
                    "Skipping fallback provider without an [ai.providers] section"
                );
                continue;
            };

            let resolved = ResolvedProvider::from_section(kind, section, ai);
            slots.push(ProviderSlot {
                provider: resolved.build(ai, app, default_class)?,
                breaker: breaker_config
                    .clone()
                    .map(|config| CircuitBreaker::new(kind.as_str(), config)),
                is_fallback: true,
            });
        }

        let set = Self { slots };
        tracing::info!(
            primary = set.primary_name().unwrap_or("none"),
            providers = set.slots.len(),
            available = set.has_available(),
            "Provider set initialized"
        );
        Ok(set)
    }

    /// Build a set from ready-made providers; the first one is the primary
    #[must_use]
    pub fn with_providers(
        providers: Vec<Arc<dyn ClassificationProvider>>,
        breaker: Option<CircuitBreakerConfig>,
    ) -> Self {
        let slots = providers
            .into_iter()
            .enumerate()
            .map(|(i, provider)| ProviderSlot {
                breaker: breaker
                    .clone()
                    .map(|config| CircuitBreaker::new(provider.name(), config)),
                provider,
                is_fallback: i > 0,
            })
            .collect();
        Self { slots }
    }

    /// Number of providers, primary included
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when the set holds no provider
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Name of the primary provider
    #[must_use]
    pub fn primary_name(&self) -> Option<&str> {
        self.slots.first().map(|slot| slot.provider.name())
    }

    /// Whether any provider could be called
    #[must_use]
    pub fn has_available(&self) -> bool {
        self.slots.iter().any(|slot| slot.provider.is_available())
    }

    /// Status of every provider, in routing order
    #[must_use]
    pub fn statuses(&self) -> Vec<ProviderStatus> {
        self.slots
            .iter()
            .map(|slot| ProviderStatus {
                name: slot.provider.name().to_string(),
                kind: slot.provider.kind(),
                available: slot.provider.is_available(),
                circuit_state: slot.breaker.as_ref().map(CircuitBreaker::state),
                is_fallback: slot.is_fallback,
            })
            .collect()
    }

    /// Classify one batch with the first provider that succeeds
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Cancelled`] as soon as a provider reports
    /// cancellation, [`ProviderError::Unavailable`] when no provider could be
    /// tried, or the error of the last provider that failed.
    pub async fn classify_batch(
        &self,
        batch: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchResult, ProviderError> {
        let mut last_error = None;

        for slot in &self.slots {
            let name = slot.provider.name();
            if !slot.provider.is_available() {
                tracing::debug!(provider = %name, "Skipping unavailable provider");
                continue;
            }

            let permit = match &slot.breaker {
                Some(breaker) => match breaker.try_acquire() {
                    Some(permit) => Some(permit),
                    None => {
                        tracing::warn!(provider = %name, "Circuit breaker open, trying next provider");
                        last_error = Some(ProviderError::CircuitOpen(name.to_string()));
                        continue;
                    }
                },
                None => None,
            };

            match slot.provider.classify(batch, cancel).await {
                Ok(classifications) => {
                    if let Some(permit) = permit {
                        permit.success();
                    }
                    return Ok(BatchResult {
                        provider: name.to_string(),
                        classifications,
                    });
                }
                // Dropping the permit leaves the breaker counts untouched.
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) => {
                    if let Some(permit) = permit {
                        permit.failure();
                    }
                    tracing::warn!(
                        provider = %name,
                        is_fallback = slot.is_fallback,
                        error = %e,
                        "Provider failed for batch"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::Unavailable("no configured provider".to_string())))
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("providers", &self.statuses())
            .finish()
    }
}

// ============================================================================
// Construction
// ============================================================================

struct ResolvedProvider {
    kind: ProviderKind,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    base_url: Option<String>,
}

impl ResolvedProvider {
    /// Fallbacks take credentials only from their own section
    fn from_section(kind: ProviderKind, section: &ProviderSettings, ai: &AiSettings) -> Self {
        Self {
            kind,
            api_key: section.api_key.clone().unwrap_or_default(),
            model: section.model.clone().unwrap_or_default(),
            temperature: section.temperature.unwrap_or(ai.temperature),
            max_tokens: section.max_tokens.unwrap_or(ai.max_tokens),
            base_url: section.base_url.clone(),
        }
    }

    fn build(
        self,
        ai: &AiSettings,
        app: &AppSettings,
        default_class: QosClass,
    ) -> Result<Arc<dyn ClassificationProvider>, ProviderError> {
        let rate_limit = RateLimitDescriptor {
            requests_per_minute: ai.rate_limit.requests_per_minute,
            burst_size: ai.rate_limit.burst_size,
            backoff_strategy: ai.rate_limit.backoff_strategy,
            max_backoff: ai.rate_limit.max_backoff,
        };

        match self.kind {
            ProviderKind::DeepSeek => {
                let retry = RetryPolicy::default()
                    .with_max_attempts(app.max_retries.max(1))
                    .with_strategy(ai.rate_limit.backoff_strategy)
                    .with_max_backoff(ai.rate_limit.max_backoff);
                let mut config = ChatCompletionConfig::new(self.kind, self.api_key, self.model)
                    .with_temperature(self.temperature)
                    .with_max_tokens(self.max_tokens)
                    .with_timeout(ai.timeout)
                    .with_retry(retry)
                    .with_rate_limit(rate_limit)
                    .with_default_class(default_class);
                if let Some(base_url) = self.base_url {
                    config = config.with_base_url(base_url);
                }
                Ok(Arc::new(ChatCompletionProvider::new(config)?))
            }
            ProviderKind::OpenAi | ProviderKind::Claude | ProviderKind::Ollama => Ok(Arc::new(
                UnimplementedProvider::new(self.kind, self.api_key, self.model, rate_limit),
            )),
        }
    }
}
