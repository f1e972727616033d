//! OpenRouter chat-completions backend.
//!
//! Transient failures (rate limits, 5xx, network) are retried with backoff
//! until either the attempt budget or the time budget in [`RetryConfig`] runs
//! out. Rate-limit responses honor the provider's `Retry-After`.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
use super::{ChatMessage, ChatResponse, CompletionOptions, LlmClient, TokenUsage};

const COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const APP_TITLE: &str = "Procurement Agent";

pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    retry: RetryConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: COMPLETIONS_URL.to_string(),
            retry: RetryConfig::default(),
        }
    }

    /// Point the client at another OpenAI-compatible completions endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(&self, body: &CompletionRequest<'_>) -> Result<ChatResponse, LlmError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", APP_TITLE)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::network_error(describe_transport_error(&e)))?;

        let status = resp.status();
        let retry_after = retry_after(resp.headers());
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(failure_from_status(status.as_u16(), text, retry_after));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::parse_error(format!("Unexpected completion body ({}): {}", e, text))
        })?;
        parsed.into_chat_response(body.model)
    }

    async fn send(&self, body: &CompletionRequest<'_>) -> anyhow::Result<ChatResponse> {
        let deadline = Instant::now() + self.retry.max_retry_duration;
        let mut attempt: u32 = 0;

        loop {
            let error = match self.send_once(body).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!("Completion succeeded on retry {}", attempt);
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            let delay = error.suggested_delay(attempt).min(remaining);
            let retryable = self.retry.should_retry(&error) && attempt < self.retry.max_retries;

            if !retryable || delay.is_zero() {
                tracing::error!(
                    "Completion for {} failed after {} attempts: {}",
                    body.model,
                    attempt + 1,
                    error
                );
                return Err(error.into());
            }

            tracing::warn!(
                "Completion attempt {} failed ({}), retrying in {:?}",
                attempt + 1,
                error.kind,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> anyhow::Result<ChatResponse> {
        self.complete_with(model, messages, CompletionOptions::default())
            .await
    }

    async fn complete_with(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> anyhow::Result<ChatResponse> {
        let body = CompletionRequest::new(model, messages, &options);
        tracing::debug!(
            "OpenRouter completion: model={}, messages={}, json={}",
            model,
            messages.len(),
            options.json_mode
        );
        self.send(&body).await
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {}", e)
    } else if e.is_connect() {
        format!("could not connect: {}", e)
    } else {
        e.to_string()
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn failure_from_status(status: u16, body: String, retry_after: Option<Duration>) -> LlmError {
    match classify_http_status(status) {
        LlmErrorKind::RateLimited => LlmError::rate_limited(body, retry_after),
        LlmErrorKind::ClientError => LlmError::client_error(status, body),
        _ => LlmError::server_error(status, body),
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

impl<'a> CompletionRequest<'a> {
    fn new(model: &'a str, messages: &'a [ChatMessage], options: &CompletionOptions) -> Self {
        Self {
            model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options.json_mode.then_some(ResponseFormat::JsonObject),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonObject,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Reply,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    content: Option<String>,
}

impl CompletionResponse {
    fn into_chat_response(self, requested_model: &str) -> Result<ChatResponse, LlmError> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(LlmError::parse_error("Completion had no choices".to_string()));
        };
        Ok(ChatResponse {
            content: choice.message.content,
            finish_reason: choice.finish_reason,
            usage: self.usage,
            model: self.model.or_else(|| Some(requested_model.to_string())),
        })
    }
}
