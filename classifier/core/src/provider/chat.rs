//! Chat Completions Backend
//!
//! Classification provider for OpenAI-compatible `/chat/completions` APIs,
//! used for DeepSeek.
//!
//! # Request Flow
//!
//! ```text
//! classify(batch)
//!   └─ retry_with_backoff ──► POST {base_url}/chat/completions
//!        (transient errors)     Authorization: Bearer <key>
//!                                   │
//!                                   ▼
//!                          choices[0].message.content
//!                                   │
//!                                   ▼
//!                          parse::parse_response
//! ```
//!
//! Both the HTTP exchange and every backoff sleep race the caller's
//! cancellation token.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::parse::parse_response;
use super::prompt::{classification_prompt, SYSTEM_PROMPT};
use super::{ClassificationProvider, ProviderError, ProviderKind, RateLimitDescriptor};
use crate::qos::{Classification, QosClass};
use crate::resilience::{retry_with_backoff, RetryPolicy};

// ============================================================================
// Configuration
// ============================================================================

/// Resolved settings for one chat completions provider
#[derive(Clone, Debug)]
pub struct ChatCompletionConfig {
    /// Backend kind
    pub kind: ProviderKind,
    /// API base URL, without the `/chat/completions` suffix
    pub base_url: String,
    /// Bearer token
    pub api_key: String,
    /// Model name
    pub model: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Completion token limit
    pub max_tokens: u32,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
    /// Rate limit parameters reported by [`ClassificationProvider::rate_limit`]
    pub rate_limit: RateLimitDescriptor,
    /// Class used when the model answers with an unknown class
    pub default_class: QosClass,
}

impl ChatCompletionConfig {
    /// Defaults for `kind` with the given credentials
    pub fn new(kind: ProviderKind, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: kind.default_base_url().to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.1,
            max_tokens: 1000,
            timeout: Duration::from_secs(90),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitDescriptor::default(),
            default_class: QosClass::CS1,
        }
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the completion token limit
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the HTTP timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the rate limit descriptor
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitDescriptor) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the default class
    #[must_use]
    pub fn with_default_class(mut self, class: QosClass) -> Self {
        self.default_class = class;
        self
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

fn api_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let message = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => {
            let detail = parsed.error;
            let code = detail.code.map(|c| match c {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            format!(
                "{} (type: {}, code: {})",
                detail.message,
                detail.kind.as_deref().unwrap_or("unknown"),
                code.as_deref().unwrap_or("none")
            )
        }
        _ => body.to_string(),
    };
    ProviderError::Api {
        status: status.as_u16(),
        message,
    }
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI-compatible chat completions client
#[derive(Clone, Debug)]
pub struct ChatCompletionProvider {
    config: ChatCompletionConfig,
    http_client: reqwest::Client,
}

impl ChatCompletionProvider {
    /// Create a provider
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Http`] if the HTTP client cannot be built.
    pub fn new(config: ChatCompletionConfig) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Settings in use
    #[must_use]
    pub fn config(&self) -> &ChatCompletionConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// One HTTP exchange, abandoned as soon as `cancel` fires
    async fn send_once(
        &self,
        request: &ChatRequest<'_>,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<ChatResponse, ProviderError> {
        let started = Instant::now();
        let send = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = send => response?,
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            body = response.text() => body?,
        };

        tracing::debug!(
            provider = %self.config.kind,
            attempt,
            status = status.as_u16(),
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            body_size = body.len(),
            "Chat completion call finished"
        );

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        if parsed.choices.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(parsed)
    }
}

#[async_trait]
impl ClassificationProvider for ChatCompletionProvider {
    fn name(&self) -> &str {
        self.config.kind.as_str()
    }

    fn kind(&self) -> ProviderKind {
        self.config.kind
    }

    async fn classify(
        &self,
        protocols: &[String],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Classification>, ProviderError> {
        if protocols.is_empty() {
            return Ok(HashMap::new());
        }

        tracing::debug!(
            provider = %self.config.kind,
            protocol_count = protocols.len(),
            model = %self.config.model,
            "Starting classification request"
        );

        let prompt = classification_prompt(protocols);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };
        let request = &request;

        let response = retry_with_backoff(
            &self.config.retry,
            cancel,
            move |attempt| self.send_once(request, cancel, attempt),
            ProviderError::is_transient,
        )
        .await
        .map_err(|e| e.into_inner().unwrap_or(ProviderError::Cancelled))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(ProviderError::EmptyResponse)?;

        let parsed = parse_response(&content, protocols, self.config.default_class);
        tracing::info!(
            provider = %self.config.kind,
            classified = parsed.classifications.len(),
            requested = protocols.len(),
            strategy = ?parsed.strategy,
            tokens_used = response.usage.map_or(0, |u| u.total_tokens),
            "Classification request completed"
        );

        Ok(parsed.classifications)
    }

    fn is_available(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn rate_limit(&self) -> RateLimitDescriptor {
        self.config.rate_limit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::ClassificationSource;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> ChatCompletionProvider {
        let config = ChatCompletionConfig::new(ProviderKind::DeepSeek, "test-key", "deepseek-chat")
            .with_base_url(server.uri())
            .with_timeout(Duration::from_secs(5))
            .with_retry(RetryPolicy::default().with_base_delay(Duration::from_millis(10)));
        ChatCompletionProvider::new(config).unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "cmpl-1",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 50, "completion_tokens": 20, "total_tokens": 70}
        })
    }

    fn batch(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_classify_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "deepseek-chat", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"[{"protocol":"zoom","class":"EF"},{"protocol":"ssh","class":"AF21"}]"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let results = provider
            .classify(&batch(&["zoom", "ssh"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["zoom"].class, QosClass::EF);
        assert_eq!(results["ssh"].source, ClassificationSource::Ai);
    }

    #[tokio::test]
    async fn test_api_error_retried_then_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Invalid API key", "type": "auth_error", "code": "invalid_key"}
            })))
            .expect(3)
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .classify(&batch(&["zoom"]), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("Invalid API key"));
                assert!(message.contains("invalid_key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_raw_error_body_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let provider = ChatCompletionProvider::new(
            provider_for(&server)
                .config()
                .clone()
                .with_retry(RetryPolicy::default().with_max_attempts(1)),
        )
        .unwrap();
        let err = provider
            .classify(&batch(&["zoom"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 502, ref message } if message == "bad gateway"));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(r#"[{"protocol":"zoom","class":"EF"}]"#)),
            )
            .mount(&server)
            .await;

        let results = provider_for(&server)
            .classify(&batch(&["zoom"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results["zoom"].class, QosClass::EF);
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .classify(&batch(&["zoom"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_cancel_abandons_in_flight_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("[]"))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            provider.classify(&batch(&["zoom"]), &cancel),
        )
        .await
        .expect("classification should stop promptly");
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let results = provider_for(&server)
            .classify(&[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_availability_follows_api_key() {
        let with_key = ChatCompletionProvider::new(ChatCompletionConfig::new(
            ProviderKind::DeepSeek,
            "k",
            "m",
        ))
        .unwrap();
        assert!(with_key.is_available());
        assert_eq!(with_key.name(), "deepseek");

        let without_key = ChatCompletionProvider::new(ChatCompletionConfig::new(
            ProviderKind::DeepSeek,
            "",
            "m",
        ))
        .unwrap();
        assert!(!without_key.is_available());
    }
}
