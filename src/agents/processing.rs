//! Processing agent: refines raw values per their processing strategy.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::ValueRefiner;
use crate::factors::{FactorDefinition, FactorValue, ProcessingType};
use crate::llm::{complete_json, LlmClient};

/// Whether a value needs a provider call at all.
///
/// Only text values are refined, and `categorize` needs categories to pick from.
pub fn needs_refinement(definition: &FactorDefinition, value: &FactorValue) -> bool {
    if value.as_text().is_none() {
        return false;
    }
    match definition.processing {
        ProcessingType::None => false,
        ProcessingType::Categorize => definition
            .categories
            .as_ref()
            .is_some_and(|c| !c.is_empty()),
        ProcessingType::SummarizeProse | ProcessingType::SummarizeKeywords => true,
    }
}

#[derive(Debug, Deserialize)]
struct CategorizedFactor {
    category: String,
}

#[derive(Debug, Deserialize)]
struct ProseSummary {
    summary: String,
}

#[derive(Debug, Deserialize)]
struct KeywordSummary {
    summary_tags: Vec<String>,
}

/// LLM-backed refiner.
pub struct LlmRefiner {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmRefiner {
    pub fn new(llm: Arc<dyn LlmClient>, model: String) -> Self {
        Self { llm, model }
    }
}

#[async_trait]
impl ValueRefiner for LlmRefiner {
    async fn refine(
        &self,
        definition: &FactorDefinition,
        value: &FactorValue,
    ) -> anyhow::Result<FactorValue> {
        if !needs_refinement(definition, value) {
            return Ok(value.clone());
        }
        let text = value.as_text().unwrap_or_default();
        let llm = self.llm.as_ref();

        let refined = match definition.processing {
            ProcessingType::Categorize => {
                let categories = definition.categories.as_deref().unwrap_or_default();
                let answer: CategorizedFactor = complete_json(
                    llm,
                    &self.model,
                    &format!(
                        "Classify the following text into one of these categories: {}.",
                        categories.join(", ")
                    ),
                    r#"{"category": "one of the categories"}"#,
                    &format!("Text to classify: '{}'", text),
                )
                .await?;
                answer.category
            }
            ProcessingType::SummarizeProse => {
                let answer: ProseSummary = complete_json(
                    llm,
                    &self.model,
                    "Summarize the following text into a single, concise sentence.",
                    r#"{"summary": "one sentence"}"#,
                    &format!("Text to summarize: '{}'", text),
                )
                .await?;
                answer.summary
            }
            ProcessingType::SummarizeKeywords => {
                let answer: KeywordSummary = complete_json(
                    llm,
                    &self.model,
                    "Summarize the following text into a list of 1-3 descriptive keywords.",
                    r#"{"summary_tags": ["keyword"]}"#,
                    &format!("Text to summarize: '{}'", text),
                )
                .await?;
                answer.summary_tags.join(", ")
            }
            ProcessingType::None => return Ok(value.clone()),
        };

        Ok(FactorValue::Text(refined))
    }
}
