//! AI Classification Providers
//!
//! Trait definitions for the AI backends that classify protocols the rule
//! engine and cache could not. The orchestrator only sees
//! [`ClassificationProvider`]; provider-specific API formats, authentication
//! and response recovery stay inside each implementation.
//!
//! # Providers
//!
//! | Kind | Implementation | Available when |
//! |------|----------------|----------------|
//! | `deepseek` | [`ChatCompletionProvider`] | API key set |
//! | `openai` | [`UnimplementedProvider`] | API key set |
//! | `claude` | [`UnimplementedProvider`] | API key set |
//! | `ollama` | [`UnimplementedProvider`] | model set |
//!
//! Providers are grouped into an ordered [`ProviderSet`]: the primary first,
//! then the enabled fallbacks.

pub mod chat;
pub mod parse;
pub mod prompt;
pub mod set;
pub mod stub;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::qos::Classification;
use crate::resilience::BackoffStrategy;

pub use chat::{ChatCompletionConfig, ChatCompletionProvider};
pub use set::{BatchResult, ProviderSet, ProviderStatus};
pub use stub::UnimplementedProvider;

// ============================================================================
// Provider Kind
// ============================================================================

/// Closed set of supported backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// DeepSeek chat completions API
    DeepSeek,
    /// OpenAI
    OpenAi,
    /// Anthropic Claude
    Claude,
    /// Local Ollama server
    Ollama,
}

impl ProviderKind {
    /// Every kind, in lookup order
    pub const ALL: [Self; 4] = [Self::DeepSeek, Self::OpenAi, Self::Claude, Self::Ollama];

    /// Configuration name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek",
            Self::OpenAi => "openai",
            Self::Claude => "claude",
            Self::Ollama => "ollama",
        }
    }

    /// API base URL used when the config gives none
    #[must_use]
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Claude => "https://api.anthropic.com/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or(ProviderError::Unsupported(name))
    }
}

// ============================================================================
// Rate Limit Descriptor
// ============================================================================

/// Rate limit parameters a provider was configured with
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitDescriptor {
    /// Steady-state rate
    pub requests_per_minute: u32,
    /// Token bucket capacity
    pub burst_size: u32,
    /// Retry delay growth
    pub backoff_strategy: BackoffStrategy,
    /// Cap on a single retry delay
    pub max_backoff: Duration,
}

impl Default for RateLimitDescriptor {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
            backoff_strategy: BackoffStrategy::Exponential,
            max_backoff: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The configured provider name is not one of the supported kinds
    #[error("unsupported AI provider: {0}")]
    Unsupported(String),

    /// The provider is not configured well enough to be called
    #[error("provider {0} is not available")]
    Unavailable(String),

    /// The provider kind exists but has no implementation yet
    #[error("{0} provider not yet implemented")]
    NotImplemented(ProviderKind),

    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message from the error body, or the raw body
        message: String,
    },

    /// The API answered without any choices
    #[error("no choices in response")]
    EmptyResponse,

    /// The answer could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider's circuit breaker rejected the call
    #[error("circuit breaker open for provider {0}")]
    CircuitOpen(String),

    /// The caller cancelled the call
    #[error("provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether another attempt at the same provider may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Api { .. } | Self::EmptyResponse | Self::InvalidResponse(_)
        )
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// An AI backend that classifies a batch of protocol names
///
/// Implementations return only protocols from the requested batch; anything
/// the model did not answer for is simply absent from the map.
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    /// Provider name used in logs and statistics
    fn name(&self) -> &str;

    /// Backend kind
    fn kind(&self) -> ProviderKind;

    /// Classify one batch
    ///
    /// Must return [`ProviderError::Cancelled`] promptly once `cancel` fires.
    async fn classify(
        &self,
        protocols: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Classification>, ProviderError>;

    /// Whether the provider is configured well enough to be called
    fn is_available(&self) -> bool;

    /// Rate limit parameters
    fn rate_limit(&self) -> RateLimitDescriptor;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("deepseek".parse::<ProviderKind>().unwrap(), ProviderKind::DeepSeek);
        assert_eq!(" OpenAI ".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("claude".parse::<ProviderKind>().unwrap(), ProviderKind::Claude);
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);

        let err = "gemini".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(ref name) if name == "gemini"));
    }

    #[test]
    fn test_default_base_urls() {
        assert_eq!(
            ProviderKind::DeepSeek.default_base_url(),
            "https://api.deepseek.com/v1"
        );
        assert_eq!(ProviderKind::Ollama.default_base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_transient_errors() {
        assert!(ProviderError::EmptyResponse.is_transient());
        assert!(ProviderError::Api {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(!ProviderError::Cancelled.is_transient());
        assert!(!ProviderError::NotImplemented(ProviderKind::Claude).is_transient());
        assert!(!ProviderError::CircuitOpen("deepseek".into()).is_transient());
    }
}
