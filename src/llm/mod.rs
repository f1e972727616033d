//! Chat-completion access for the research agents.
//!
//! Agents depend on [`LlmClient`] only; [`OpenRouterClient`] is the production
//! backend. Most callers go through [`complete_json`], which asks for a JSON
//! object and deserializes it into a typed answer.

mod error;
mod openrouter;
mod structured;

pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use openrouter::OpenRouterClient;
pub use structured::{complete_json, extract_json};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Who authored a prompt message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// The first choice of a completion.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    /// Model that actually served the request.
    pub model: Option<String>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Sampling knobs for one completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    /// Ask the provider to return a JSON object.
    pub json_mode: bool,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> anyhow::Result<ChatResponse>;

    /// Backends without option support fall back to [`LlmClient::complete`].
    async fn complete_with(
        &self,
        model: &str,
        messages: &[ChatMessage],
        _options: CompletionOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.complete(model, messages).await
    }
}
