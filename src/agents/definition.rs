//! Factor definition agent.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::FactorResolver;
use crate::factors::{FactorDefinition, ProcessingType};
use crate::llm::{complete_json, LlmClient};

const SYSTEM_PROMPT: &str = "You are a data pipeline architect. Define how to extract and process a data field based on its name.\n\
1. 'schema': a JSON schema for the field. Plain text is {\"type\": \"string\"}. Fields implying a list (e.g. 'Subscription Plans') are an array of objects, e.g. {\"type\": \"array\", \"items\": {\"type\": \"object\", \"properties\": {\"tier_name\": {\"type\": \"string\"}, \"price\": {\"type\": \"string\"}}}}.\n\
2. 'processing': one of 'categorize', 'summarize_prose', 'summarize_keywords', 'none'.\n\
3. 'categories': when 'processing' is 'categorize', 3-5 sensible category options; otherwise null.";

const OUTPUT_SHAPE: &str = r#"{"schema": {"type": "string"}, "processing": "none", "categories": null}"#;

/// Raw model answer; the schema may come back as a JSON string.
#[derive(Debug, Deserialize)]
struct DefinitionAnswer {
    schema: serde_json::Value,
    processing: ProcessingType,
    #[serde(default)]
    categories: Option<Vec<String>>,
}

impl DefinitionAnswer {
    fn into_definition(self) -> FactorDefinition {
        let schema = match self.schema {
            serde_json::Value::String(s) => {
                serde_json::from_str(&s).unwrap_or_else(|_| FactorDefinition::plain().schema)
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            _ => FactorDefinition::plain().schema,
        };
        let categories = self.categories.filter(|c| !c.is_empty());
        FactorDefinition {
            schema,
            processing: self.processing,
            categories,
        }
    }
}

/// LLM-backed factor resolver.
pub struct LlmFactorResolver {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmFactorResolver {
    pub fn new(llm: Arc<dyn LlmClient>, model: String) -> Self {
        Self { llm, model }
    }
}

#[async_trait]
impl FactorResolver for LlmFactorResolver {
    async fn resolve(&self, factor_name: &str) -> anyhow::Result<FactorDefinition> {
        let answer: DefinitionAnswer = complete_json(
            self.llm.as_ref(),
            &self.model,
            SYSTEM_PROMPT,
            OUTPUT_SHAPE,
            &format!("Define handling for factor: '{}'", factor_name),
        )
        .await?;
        let definition = answer.into_definition();
        tracing::debug!(
            "Resolved factor '{}' with processing '{}'",
            factor_name,
            definition.processing
        );
        Ok(definition)
    }
}
