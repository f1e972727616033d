//! Clarification agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::Clarifier;
use crate::factors::FactorTemplates;
use crate::llm::{complete_json, LlmClient};

const SYSTEM_PROMPT: &str = "You are a search query assistant. Your only job is to evaluate a user's query about a software product category. You have two possible outputs:\n\
1. If the query is specific and clear (e.g. 'CRM software', 'API gateways'), set 'needs_clarification' to false and return the user's query VERBATIM in 'clarified_query'.\n\
2. If the query is too generic (e.g. 'software', 'tools'), set 'needs_clarification' to true and put a question for the user in 'question_for_user'.\n\
Never modify, refine or rephrase the user's query.";

const OUTPUT_SHAPE: &str = r#"{"clarified_query": "string", "needs_clarification": false, "question_for_user": "string or null"}"#;

/// Fallback question when the model flags ambiguity without asking anything.
pub const DEFAULT_QUESTION: &str = "Query is too ambiguous.";

/// Outcome of the clarification step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    #[serde(default)]
    pub clarified_query: String,
    pub needs_clarification: bool,
    #[serde(default)]
    pub question_for_user: Option<String>,
    /// Factors suggested for the query; empty when clarification is needed.
    #[serde(default)]
    pub comparison_factors: Vec<String>,
}

impl Clarification {
    /// The query is clear; research it with `factors`.
    pub fn clear(query: impl Into<String>, factors: Vec<String>) -> Self {
        Self {
            clarified_query: query.into(),
            needs_clarification: false,
            question_for_user: None,
            comparison_factors: factors,
        }
    }

    /// The query is ambiguous; ask the user `question`.
    pub fn ask(question: impl Into<String>) -> Self {
        Self {
            clarified_query: String::new(),
            needs_clarification: true,
            question_for_user: Some(question.into()),
            comparison_factors: Vec::new(),
        }
    }

    /// Question to surface to the user.
    pub fn question(&self) -> &str {
        self.question_for_user
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_QUESTION)
    }
}

/// LLM-backed clarifier. Suggests the `generic` template factors for clear queries.
pub struct LlmClarifier {
    llm: Arc<dyn LlmClient>,
    model: String,
    templates: FactorTemplates,
}

impl LlmClarifier {
    pub fn new(llm: Arc<dyn LlmClient>, model: String, templates: FactorTemplates) -> Self {
        Self {
            llm,
            model,
            templates,
        }
    }
}

#[async_trait]
impl Clarifier for LlmClarifier {
    async fn clarify(&self, query: &str) -> anyhow::Result<Clarification> {
        let mut result: Clarification = complete_json(
            self.llm.as_ref(),
            &self.model,
            SYSTEM_PROMPT,
            OUTPUT_SHAPE,
            &format!("Evaluate the following product query: '{}'", query),
        )
        .await?;

        if result.needs_clarification {
            result.comparison_factors.clear();
        } else {
            if result.clarified_query.trim().is_empty() {
                result.clarified_query = query.to_string();
            }
            result.comparison_factors = self.templates.generic().to_vec();
        }

        tracing::info!(
            "Clarification for query '{}': result '{}', needs clarification: {}",
            query,
            result.clarified_query,
            result.needs_clarification
        );
        Ok(result)
    }
}
