//! Chat-completion client.
//!
//! [`CompletionClient`] is the seam between the chat service and the
//! language model. [`OpenAiClient`] implements it against any
//! OpenAI-compatible `POST {base_url}/chat/completions` endpoint.
//!
//! # Failure handling
//!
//! | Condition                         | Result                         | Retried |
//! |-----------------------------------|--------------------------------|---------|
//! | connection refused / reset        | [`UpstreamError::Network`]     | yes, up to `network_retries` |
//! | no response within `timeout_secs` | [`UpstreamError::Timeout`]     | no      |
//! | HTTP 401 / 403                    | [`UpstreamError::Unauthorized`]| no      |
//! | HTTP 429                          | [`UpstreamError::RateLimited`] | no      |
//! | any other non-2xx                 | [`UpstreamError::Status`]      | no      |
//! | body without a message content    | [`UpstreamError::InvalidPayload`] | no   |
//! | API key not configured            | [`UpstreamError::MissingApiKey`]  | no   |
//!
//! Retries are immediate; there is no backoff.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CompletionConfig;
use crate::prompt::ChatMessage;

/// Upstream error bodies are cut to this many characters in error values.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("completion API key is not configured (set {0})")]
    MissingApiKey(String),
    #[error("completion request timed out")]
    Timeout,
    #[error("network error calling completion API: {0}")]
    Network(String),
    #[error("completion API rate limit exceeded")]
    RateLimited,
    #[error("completion API rejected credentials (HTTP {0})")]
    Unauthorized(u16),
    #[error("completion API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid completion API response: {0}")]
    InvalidPayload(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, UpstreamError::Timeout)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════════════════

/// Produces the assistant's reply for a list of chat messages.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError>;
}

// ═══════════════════════════════════════════════════════════════════════
// OpenAI-compatible implementation
// ═══════════════════════════════════════════════════════════════════════

pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    api_key_env: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    network_retries: u32,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

/// Outcome of a single HTTP attempt.
enum Attempt {
    Retryable(UpstreamError),
    Fatal(UpstreamError),
}

impl OpenAiClient {
    /// Builds a client whose API key comes from the environment variable
    /// named by `config.api_key_env`.
    ///
    /// A missing key is not an error here; every request then fails with
    /// [`UpstreamError::MissingApiKey`].
    pub fn new(config: &CompletionConfig) -> Result<Self, UpstreamError> {
        let api_key = config.api_key();
        if api_key.is_none() {
            warn!(
                env = %config.api_key_env,
                "completion API key not set; questions will fail until it is configured"
            );
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &CompletionConfig,
        api_key: Option<String>,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            api_key_env: config.api_key_env.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            network_retries: config.network_retries,
        })
    }

    async fn send_once(&self, api_key: &str, messages: &[ChatMessage]) -> Result<String, Attempt> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Attempt::Fatal(UpstreamError::Timeout)
                } else {
                    Attempt::Retryable(UpstreamError::Network(e.to_string()))
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            Attempt::Fatal(if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::Network(e.to_string())
            })
        })?;

        if !status.is_success() {
            return Err(Attempt::Fatal(status_error(status, &text)));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| Attempt::Fatal(UpstreamError::InvalidPayload(e.to_string())))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                Attempt::Fatal(UpstreamError::InvalidPayload(
                    "response has no message content".to_string(),
                ))
            })
    }
}

fn status_error(status: StatusCode, body: &str) -> UpstreamError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            UpstreamError::Unauthorized(status.as_u16())
        }
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited,
        _ => UpstreamError::Status {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        },
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| UpstreamError::MissingApiKey(self.api_key_env.clone()))?;

        let mut attempt = 0u32;
        loop {
            match self.send_once(api_key, messages).await {
                Ok(content) => {
                    debug!(attempt, chars = content.len(), "completion received");
                    return Ok(content);
                }
                Err(Attempt::Retryable(err)) if attempt < self.network_retries => {
                    attempt += 1;
                    warn!(error = %err, attempt, "completion request failed; retrying");
                }
                Err(Attempt::Retryable(err)) | Err(Attempt::Fatal(err)) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            UpstreamError::Unauthorized(401)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, ""),
            UpstreamError::Unauthorized(403)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            UpstreamError::RateLimited
        ));
        match status_error(StatusCode::INTERNAL_SERVER_ERROR, &"x".repeat(2000)) {
            UpstreamError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = CompletionConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..Default::default()
        };
        let client = OpenAiClient::with_api_key(&config, Some("k".into())).unwrap();
        assert_eq!(client.endpoint, "http://localhost:8080/v1/chat/completions");
    }

    #[tokio::test]
    async fn missing_key_fails_without_request() {
        let config = CompletionConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let client = OpenAiClient::with_api_key(&config, None).unwrap();
        let err = client
            .complete(&[ChatMessage::user("hola")])
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::MissingApiKey(ref v) if v == "OPENAI_API_KEY"));
    }
}
