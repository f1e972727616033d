//! Discovery agent: finds candidate products through an Exa research task.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::Discovery;
use crate::factors::{factor_key, FactorDefinition, FactorValue};
use crate::search::ExaClient;
use crate::task::{Attribute, Item};

const NAME_KEY: &str = "product_name";

/// A factor name paired with its resolved definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorSpec {
    pub name: String,
    pub definition: FactorDefinition,
}

impl FactorSpec {
    pub fn new(name: impl Into<String>, definition: FactorDefinition) -> Self {
        Self {
            name: name.into(),
            definition,
        }
    }
}

/// Output schema for the research task: `{products: [{product_name, <factor keys>...}]}`.
pub fn build_output_schema(factors: &[FactorSpec]) -> Value {
    let mut properties = Map::new();
    properties.insert(
        NAME_KEY.to_string(),
        json!({ "type": "string", "description": "The product name." }),
    );
    for factor in factors {
        let schema = if factor.definition.schema.is_object() {
            factor.definition.schema.clone()
        } else {
            json!({ "type": "string" })
        };
        properties.insert(factor_key(&factor.name), schema);
    }

    json!({
        "type": "object",
        "required": ["products"],
        "properties": {
            "products": {
                "type": "array",
                "items": { "type": "object", "properties": properties }
            }
        }
    })
}

/// Research instructions for a category.
pub fn build_instructions(category: &str, factors: &[FactorSpec]) -> String {
    let mut lines = vec![
        format!(
            "Find and compare 10-15 of the leading software solutions for '{}'.",
            category
        ),
        "For each solution, extract the following information based on the described schema:"
            .to_string(),
    ];
    lines.extend(
        factors
            .iter()
            .map(|f| format!("- **{}**: Extract this value based on the schema.", f.name)),
    );
    lines.join("\n")
}

/// Map research output into items; attributes keep factor order and carry
/// their definitions for the processing phase.
pub fn map_products(output: &Value, factors: &[FactorSpec]) -> Vec<Item> {
    let Some(products) = output.get("products").and_then(Value::as_array) else {
        return Vec::new();
    };

    products
        .iter()
        .filter_map(Value::as_object)
        .map(|product| Item {
            name: product
                .get(NAME_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
            attributes: factors
                .iter()
                .map(|factor| {
                    let value = product
                        .get(&factor_key(&factor.name))
                        .cloned()
                        .map(FactorValue::from_provider)
                        .unwrap_or_else(FactorValue::not_found);
                    Attribute::new(factor.name.clone(), value)
                        .with_definition(factor.definition.clone())
                })
                .collect(),
        })
        .collect()
}

/// Exa research backed discovery.
pub struct ResearchDiscovery {
    exa: ExaClient,
}

impl ResearchDiscovery {
    pub fn new(exa: ExaClient) -> Self {
        Self { exa }
    }
}

#[async_trait]
impl Discovery for ResearchDiscovery {
    async fn discover(&self, category: &str, factors: &[FactorSpec]) -> anyhow::Result<Vec<Item>> {
        let schema = build_output_schema(factors);
        let instructions = build_instructions(category, factors);

        let Some(output) = self.exa.research(&instructions, &schema).await? else {
            tracing::warn!("Research for '{}' returned no structured output", category);
            return Ok(Vec::new());
        };

        let items = map_products(&output, factors);
        tracing::info!("Discovered {} items for '{}'", items.len(), category);
        Ok(items)
    }
}
