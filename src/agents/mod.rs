//! Agents - the collaborators the orchestrator drives.
//!
//! Each phase of a research task talks to one of the traits below. The
//! production implementations are backed by an [`LlmClient`] and the Exa
//! API; tests plug in scripted fakes.
//!
//! Collaborators report failure through `anyhow::Result`; deciding whether a
//! failure is fatal or degradable is the orchestrator's job.

mod clarification;
mod definition;
mod discovery;
mod enrichment;
mod formatting;
mod processing;
mod targeting;

pub use clarification::{Clarification, LlmClarifier};
pub use definition::LlmFactorResolver;
pub use discovery::{build_instructions, build_output_schema, map_products, FactorSpec, ResearchDiscovery};
pub use enrichment::{merge_attributes, ExaSourceFetcher, LlmSourceMerger};
pub use formatting::{format_header, format_value, CsvFormatter};
pub use processing::{needs_refinement, LlmRefiner};
pub use targeting::LlmQueryGenerator;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::factors::{FactorDefinition, FactorTemplates, FactorValue};
use crate::llm::{LlmClient, OpenRouterClient};
use crate::search::ExaClient;
use crate::task::{Item, TaskError};

/// Decides whether a query is specific enough to research.
#[async_trait]
pub trait Clarifier: Send + Sync {
    async fn clarify(&self, query: &str) -> anyhow::Result<Clarification>;
}

/// Resolves how a factor is extracted and processed.
#[async_trait]
pub trait FactorResolver: Send + Sync {
    async fn resolve(&self, factor_name: &str) -> anyhow::Result<FactorDefinition>;
}

/// Finds candidate items for a category with raw attribute values.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, category: &str, factors: &[FactorSpec]) -> anyhow::Result<Vec<Item>>;
}

/// Refines one raw value according to its factor definition.
#[async_trait]
pub trait ValueRefiner: Send + Sync {
    async fn refine(
        &self,
        definition: &FactorDefinition,
        value: &FactorValue,
    ) -> anyhow::Result<FactorValue>;
}

/// Produces targeted follow-up queries for an item, best first.
#[async_trait]
pub trait FollowupQueryGenerator: Send + Sync {
    async fn generate(&self, item: &Item, max_queries: usize) -> anyhow::Result<Vec<String>>;
}

/// Fetches the text of the single most authoritative source for a query.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_top_source(&self, query: &str) -> anyhow::Result<Option<String>>;
}

/// Merges source text back into an item's attributes.
#[async_trait]
pub trait SourceMerger: Send + Sync {
    async fn merge(&self, item: &Item, source: &str) -> anyhow::Result<Item>;
}

/// Renders final items into the report.
pub trait ReportFormatter: Send + Sync {
    fn render(&self, items: &[Item], factors: &[String]) -> anyhow::Result<String>;
}

/// The full set of collaborators for one orchestrator.
#[derive(Clone)]
pub struct Agents {
    pub clarifier: Arc<dyn Clarifier>,
    pub resolver: Arc<dyn FactorResolver>,
    pub discovery: Arc<dyn Discovery>,
    pub refiner: Arc<dyn ValueRefiner>,
    pub queries: Arc<dyn FollowupQueryGenerator>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub merger: Arc<dyn SourceMerger>,
    pub formatter: Arc<dyn ReportFormatter>,
    /// Upper bound on follow-up queries requested per item.
    pub max_followup_queries: usize,
}

impl Agents {
    /// Build the production collaborators from configuration.
    ///
    /// Fails with [`TaskError::Configuration`] when a provider key is missing.
    pub fn from_config(config: &Config) -> Result<Self, TaskError> {
        let llm_key = config
            .providers
            .openrouter_api_key
            .clone()
            .ok_or_else(|| TaskError::Configuration("OPENROUTER_API_KEY".to_string()))?;
        let exa_key = config
            .providers
            .exa_api_key
            .clone()
            .ok_or_else(|| TaskError::Configuration("EXA_API_KEY".to_string()))?;

        let llm: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::new(llm_key));
        let exa = ExaClient::new(exa_key);
        let model = config.default_model.clone();
        let templates =
            FactorTemplates::load_or_default(config.factor_templates_path.as_deref());

        Ok(Self {
            clarifier: Arc::new(LlmClarifier::new(Arc::clone(&llm), model.clone(), templates)),
            resolver: Arc::new(LlmFactorResolver::new(Arc::clone(&llm), model.clone())),
            discovery: Arc::new(ResearchDiscovery::new(exa.clone())),
            refiner: Arc::new(LlmRefiner::new(Arc::clone(&llm), model.clone())),
            queries: Arc::new(LlmQueryGenerator::new(Arc::clone(&llm), model.clone())),
            fetcher: Arc::new(ExaSourceFetcher::new(exa)),
            merger: Arc::new(LlmSourceMerger::new(llm, model)),
            formatter: Arc::new(CsvFormatter),
            max_followup_queries: config.max_followup_queries,
        })
    }
}

/// `name: value` pairs describing an item's current attributes, for prompts.
pub(crate) fn describe_attributes(item: &Item) -> String {
    item.attributes
        .iter()
        .map(|a| format!("{}: {}", a.name, a.value))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Attribute;

    #[test]
    fn test_from_config_requires_provider_keys() {
        let mut config = Config::default();
        assert_eq!(
            Agents::from_config(&config).err(),
            Some(TaskError::Configuration("OPENROUTER_API_KEY".to_string()))
        );

        config.providers.openrouter_api_key = Some("or-key".to_string());
        assert_eq!(
            Agents::from_config(&config).err(),
            Some(TaskError::Configuration("EXA_API_KEY".to_string()))
        );

        config.providers.exa_api_key = Some("exa-key".to_string());
        let agents = Agents::from_config(&config).unwrap();
        assert_eq!(agents.max_followup_queries, 3);
    }

    #[test]
    fn test_describe_attributes() {
        let item = Item::new("Acme")
            .with_attribute(Attribute::new("Pricing", "$10/seat"))
            .with_attribute(Attribute::new("Open Source", FactorValue::Bool(false)));
        assert_eq!(describe_attributes(&item), "Pricing: $10/seat, Open Source: false");
    }
}
