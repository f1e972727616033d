//! Typed JSON answers from chat completions.

use anyhow::Context;
use serde::de::DeserializeOwned;

use super::{ChatMessage, CompletionOptions, LlmClient};

/// Run a system + user prompt and deserialize the JSON answer into `T`.
///
/// The system prompt is extended with the expected output shape; the reply
/// may be wrapped in a markdown code fence.
pub async fn complete_json<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    model: &str,
    system_prompt: &str,
    output_shape: &str,
    user_prompt: &str,
) -> anyhow::Result<T> {
    let system = format!(
        "{}\n\nRespond with a single JSON object and nothing else, shaped like:\n{}",
        system_prompt, output_shape
    );
    let messages = [ChatMessage::system(system), ChatMessage::user(user_prompt)];
    let options = CompletionOptions {
        temperature: Some(0.0),
        json_mode: true,
        ..Default::default()
    };

    let response = llm
        .complete_with(model, &messages, options)
        .await?;
    let content = response
        .content
        .filter(|c| !c.trim().is_empty())
        .context("Model returned an empty response")?;

    serde_json::from_str(extract_json(&content))
        .with_context(|| format!("Model returned malformed JSON: {}", content))
}

/// Locate the JSON object inside a model reply.
pub fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use async_trait::async_trait;
    use serde::Deserialize;

    struct CannedLlm(&'static str);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
        ) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse {
                content: Some(self.0.to_string()),
                finish_reason: Some("stop".to_string()),
                usage: None,
                model: None,
            })
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        summary: String,
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("  {\"a\": {\"b\": 2}} "), "{\"a\": {\"b\": 2}}");
        assert_eq!(extract_json("no json"), "no json");
    }

    #[tokio::test]
    async fn test_complete_json_parses_fenced_reply() {
        let llm = CannedLlm("```json\n{\"summary\": \"Cloud CRM.\"}\n```");
        let answer: Answer = complete_json(&llm, "m", "Summarize.", "{\"summary\": \"...\"}", "x")
            .await
            .unwrap();
        assert_eq!(answer.summary, "Cloud CRM.");
    }

    #[tokio::test]
    async fn test_complete_json_rejects_garbage() {
        let llm = CannedLlm("I cannot help with that.");
        let result: anyhow::Result<Answer> =
            complete_json(&llm, "m", "Summarize.", "{\"summary\": \"...\"}", "x").await;
        assert!(result.is_err());
    }
}
