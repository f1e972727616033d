//! Factor templates.
//!
//! Templates map a template name to a list of factor names. The `generic`
//! template supplies the factors suggested for any unambiguous query.
//! Templates are read from `FACTOR_TEMPLATES_PATH` when configured; the
//! built-in set is used otherwise.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const GENERIC: &str = "generic";

const BUILTIN_GENERIC: &[&str] = &[
    "Pricing",
    "Open Source",
    "Key Features",
    "Deployment Model",
    "Target Audience",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct FactorTemplates(HashMap<String, Vec<String>>);

impl Default for FactorTemplates {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert(
            GENERIC.to_string(),
            BUILTIN_GENERIC.iter().map(|s| s.to_string()).collect(),
        );
        Self(map)
    }
}

impl FactorTemplates {
    /// Load templates from a file path.
    pub fn load_from_path(path: &Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Load templates from an optional path, falling back to the built-in set.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load_from_path(path) {
            Ok(templates) => {
                tracing::info!("Loaded factor templates from {}", path.display());
                templates
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load factor templates from {}: {}, using built-in templates",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn get(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Factors suggested for any product category.
    pub fn generic(&self) -> &[String] {
        self.get(GENERIC)
    }
}
