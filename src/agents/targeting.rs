//! Targeting agent: spots data gaps and proposes follow-up search queries.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{describe_attributes, FollowupQueryGenerator};
use crate::llm::{complete_json, LlmClient};
use crate::task::Item;

const SYSTEM_PROMPT: &str = "You are a research strategist. Analyze an incomplete dataset for a product and generate highly specific search queries to find the missing information.\n\
1. Look for vague fields, logical inconsistencies (e.g. 'Freemium' with no free plan listed) or missing details, especially for 'Subscription Plans', 'Pricing' or 'Key Features'.\n\
2. Create precise search queries that find the most authoritative pages (official pricing or feature pages). Good: 'official CircleCI pricing and plans for enterprise'. Bad: 'CircleCI info'.\n\
3. Order the queries from most to least useful.";

#[derive(Debug, Deserialize)]
struct TargetedQueries {
    #[serde(default)]
    queries: Vec<String>,
}

/// LLM-backed follow-up query generator.
pub struct LlmQueryGenerator {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmQueryGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, model: String) -> Self {
        Self { llm, model }
    }
}

#[async_trait]
impl FollowupQueryGenerator for LlmQueryGenerator {
    async fn generate(&self, item: &Item, max_queries: usize) -> anyhow::Result<Vec<String>> {
        let name = item.display_name().unwrap_or("unknown");
        let answer: TargetedQueries = complete_json(
            self.llm.as_ref(),
            &self.model,
            &format!("{}\nReturn between 1 and {} queries.", SYSTEM_PROMPT, max_queries),
            r#"{"queries": ["search query"]}"#,
            &format!(
                "Analyze the following data and generate targeted search queries to find missing information:\n\
                 **Product Name**: {}\n**Current Data**: {}",
                name,
                describe_attributes(item)
            ),
        )
        .await?;

        let queries: Vec<String> = answer
            .queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(max_queries)
            .collect();
        tracing::info!("Generated {} enrichment queries for {}", queries.len(), name);
        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ChatResponse};
    use crate::task::Attribute;

    struct CannedLlm(&'static str);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
        ) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse::text(self.0))
        }
    }

    #[tokio::test]
    async fn test_queries_trimmed_and_capped() {
        let generator = LlmQueryGenerator::new(
            Arc::new(CannedLlm(
                r#"{"queries": [" official Acme pricing ", "", "Acme enterprise plans", "Acme api docs"]}"#,
            )),
            "m".to_string(),
        );
        let item = Item::new("Acme").with_attribute(Attribute::new("Pricing", "Contact sales"));
        let queries = generator.generate(&item, 2).await.unwrap();
        assert_eq!(queries, vec!["official Acme pricing", "Acme enterprise plans"]);
    }

    #[tokio::test]
    async fn test_missing_queries_is_empty() {
        let generator = LlmQueryGenerator::new(Arc::new(CannedLlm("{}")), "m".to_string());
        let queries = generator.generate(&Item::new("Acme"), 3).await.unwrap();
        assert!(queries.is_empty());
    }
}
