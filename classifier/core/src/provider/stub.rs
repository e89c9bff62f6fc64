//! Placeholder backends
//!
//! `openai`, `claude` and `ollama` can be configured and reported in
//! provider statuses, but every call fails with
//! [`ProviderError::NotImplemented`] so the provider set moves on to the next
//! provider.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ClassificationProvider, ProviderError, ProviderKind, RateLimitDescriptor};
use crate::qos::Classification;

/// A configured provider kind without a client implementation
#[derive(Clone, Debug)]
pub struct UnimplementedProvider {
    kind: ProviderKind,
    api_key: String,
    model: String,
    rate_limit: RateLimitDescriptor,
}

impl UnimplementedProvider {
    /// Create a placeholder for `kind`
    pub fn new(
        kind: ProviderKind,
        api_key: impl Into<String>,
        model: impl Into<String>,
        rate_limit: RateLimitDescriptor,
    ) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            model: model.into(),
            rate_limit,
        }
    }
}

#[async_trait]
impl ClassificationProvider for UnimplementedProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn classify(
        &self,
        _protocols: &[String],
        _cancel: &CancellationToken,
    ) -> Result<HashMap<String, Classification>, ProviderError> {
        Err(ProviderError::NotImplemented(self.kind))
    }

    fn is_available(&self) -> bool {
        match self.kind {
            // Local server, no credentials
            ProviderKind::Ollama => !self.model.is_empty(),
            ProviderKind::DeepSeek | ProviderKind::OpenAi | ProviderKind::Claude => {
                !self.api_key.is_empty()
            }
        }
    }

    fn rate_limit(&self) -> RateLimitDescriptor {
        self.rate_limit.clone()
    }
}
