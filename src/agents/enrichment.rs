//! Enrichment agents: fetch one authoritative source and merge it back in.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{describe_attributes, SourceFetcher, SourceMerger};
use crate::factors::FactorValue;
use crate::llm::{complete_json, LlmClient};
use crate::search::ExaClient;
use crate::task::{Attribute, Item};

/// Source text beyond this many characters is cut before prompting.
const MAX_SOURCE_CHARS: usize = 40_000;

const MERGE_SYSTEM_PROMPT: &str = "You are a data enrichment specialist. Correct and complete a structured dataset for a product using a webpage as the source of truth.\n\
1. Compare the 'Current Data' with the 'Source Webpage'.\n\
2. Fix inaccuracies and fill in missing information, especially for complex fields like 'Subscription Plans'.\n\
3. Return the complete, authoritative data for the product using the same factor names. Use professional, business-appropriate terminology (e.g. for 'Maturity' use 'Emerging', 'Growth Stage', 'Mature').";

const MERGE_OUTPUT_SHAPE: &str =
    r#"{"product_name": "string", "factors": [{"name": "factor name", "value": "any JSON value"}]}"#;

/// Keyword search for the top hit, then its page text.
pub struct ExaSourceFetcher {
    exa: ExaClient,
}

impl ExaSourceFetcher {
    pub fn new(exa: ExaClient) -> Self {
        Self { exa }
    }
}

#[async_trait]
impl SourceFetcher for ExaSourceFetcher {
    async fn fetch_top_source(&self, query: &str) -> anyhow::Result<Option<String>> {
        let Some(top) = self.exa.search(query, 1).await?.into_iter().next() else {
            tracing::debug!("No search results for '{}'", query);
            return Ok(None);
        };

        let text = self
            .exa
            .contents(&[top.url.clone()])
            .await?
            .into_iter()
            .next()
            .and_then(|page| page.text)
            .filter(|text| !text.trim().is_empty());

        if text.is_none() {
            tracing::debug!("No content fetched from {}", top.url);
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct MergedFactor {
    name: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EnrichedData {
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    factors: Vec<MergedFactor>,
}

/// Apply merged values onto an item.
///
/// Attributes are replaced by name, unknown names are appended and attributes
/// the source did not mention keep their previous value. The item name only
/// changes when the merge supplies a non-blank one.
pub fn merge_attributes(
    item: &Item,
    name: Option<String>,
    merged: Vec<(String, FactorValue)>,
) -> Item {
    let mut result = item.clone();
    if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
        result.name = Some(name);
    }
    for (factor, value) in merged {
        match result.attributes.iter_mut().find(|a| a.name == factor) {
            Some(existing) => existing.value = value,
            None => result.attributes.push(Attribute::new(factor, value)),
        }
    }
    result
}

/// LLM-backed merger.
pub struct LlmSourceMerger {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmSourceMerger {
    pub fn new(llm: Arc<dyn LlmClient>, model: String) -> Self {
        Self { llm, model }
    }
}

#[async_trait]
impl SourceMerger for LlmSourceMerger {
    async fn merge(&self, item: &Item, source: &str) -> anyhow::Result<Item> {
        let source: String = source.chars().take(MAX_SOURCE_CHARS).collect();
        let name = item.display_name().unwrap_or("unknown");

        let answer: EnrichedData = complete_json(
            self.llm.as_ref(),
            &self.model,
            MERGE_SYSTEM_PROMPT,
            MERGE_OUTPUT_SHAPE,
            &format!(
                "Enrich the following dataset:\n**Product Name**: {}\n**Current Data**: {}\n\n**Source Webpage Content**:\n{}",
                name,
                describe_attributes(item),
                source
            ),
        )
        .await?;

        let merged = answer
            .factors
            .into_iter()
            .map(|f| (f.name, FactorValue::from_provider(f.value)))
            .collect();
        tracing::info!("Enriched data for {}", name);
        Ok(merge_attributes(item, answer.product_name, merged))
    }
}
