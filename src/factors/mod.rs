//! Factor module - the comparable attributes tracked across discovered items.
//!
//! # Key Concepts
//! - Factor: a named attribute (e.g. "Pricing", "Open Source")
//! - Definition: extraction schema plus the processing strategy for a factor
//! - Value: the tagged value extracted for one factor of one item
//! - Templates: default factor sets suggested for unambiguous queries

mod templates;
mod value;

pub use templates::FactorTemplates;
pub use value::{FactorValue, NOT_FOUND};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Processing rule applied to a factor value after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingType {
    Categorize,
    SummarizeProse,
    SummarizeKeywords,
    #[default]
    None,
}

impl ProcessingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Categorize => "categorize",
            Self::SummarizeProse => "summarize_prose",
            Self::SummarizeKeywords => "summarize_keywords",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete handling logic for one comparison factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorDefinition {
    /// JSON schema used when extracting this factor.
    pub schema: serde_json::Value,
    pub processing: ProcessingType,
    /// Category options, only meaningful for [`ProcessingType::Categorize`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

impl FactorDefinition {
    /// Plain string factor that is passed through untouched.
    pub fn plain() -> Self {
        Self {
            schema: serde_json::json!({ "type": "string" }),
            processing: ProcessingType::None,
            categories: None,
        }
    }
}

impl Default for FactorDefinition {
    fn default() -> Self {
        Self::plain()
    }
}

/// Extraction key for a factor name: `"Open Source"` -> `open_source`.
pub fn factor_key(name: &str) -> String {
    name.to_lowercase().replace([' ', '/'], "_")
}

/// Deduplicate and sort a factor list.
pub fn normalize_factors<I, S>(factors: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    factors
        .into_iter()
        .map(Into::into)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}
