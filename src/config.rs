//! Configuration management.
//!
//! Configuration is read from the environment (optionally seeded from a `.env`
//! file in `main`):
//! - `HOST` / `PORT` - bind address (default `127.0.0.1:8000`)
//! - `API_KEY` - shared credential expected in the `x-api-key` header
//! - `DEV_MODE` - when `true`, the API does not require a credential
//! - `OPENROUTER_API_KEY` - LLM provider key
//! - `EXA_API_KEY` - search/research provider key
//! - `DEFAULT_MODEL` - model used for every LLM call
//! - `MAX_FOLLOWUP_QUERIES` - cap on enrichment queries per item (1..=5)
//! - `FACTOR_TEMPLATES_PATH` - optional JSON file with factor templates
//! - `CORS_ORIGINS` - comma separated list of allowed origins

use std::path::PathBuf;
use thiserror::Error;

/// Default LLM model (served through OpenRouter).
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";

/// Default number of targeted enrichment queries generated per item.
pub const DEFAULT_MAX_FOLLOWUP_QUERIES: usize = 3;

const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:5173", "http://127.0.0.1:5173"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} must be set when DEV_MODE is not enabled")]
    MissingCredential(&'static str),
}

/// Server authentication settings.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Shared credential compared against the `x-api-key` header.
    pub api_key: Option<String>,
}

impl AuthConfig {
    /// Whether requests must present a credential.
    pub fn auth_required(&self, dev_mode: bool) -> bool {
        !dev_mode
    }
}

/// Credentials for the upstream providers used by the agents.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub openrouter_api_key: Option<String>,
    pub exa_api_key: Option<String>,
}

/// Runtime configuration for the procurement agent.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
    pub auth: AuthConfig,
    pub providers: ProviderKeys,
    pub default_model: String,
    pub max_followup_queries: usize,
    pub factor_templates_path: Option<PathBuf>,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            dev_mode: false,
            auth: AuthConfig::default(),
            providers: ProviderKeys::default(),
            default_model: DEFAULT_MODEL.to_string(),
            max_followup_queries: DEFAULT_MAX_FOLLOWUP_QUERIES,
            factor_templates_path: None,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Config::default();

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                name: "PORT",
                value: raw,
            })?,
            None => defaults.port,
        };

        let dev_mode = match get("DEV_MODE") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidValue {
                name: "DEV_MODE",
                value: raw,
            })?,
            None => false,
        };

        let max_followup_queries = match get("MAX_FOLLOWUP_QUERIES") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "MAX_FOLLOWUP_QUERIES",
                    value: raw,
                })?
                .clamp(1, 5),
            None => defaults.max_followup_queries,
        };

        let auth = AuthConfig {
            api_key: get("API_KEY"),
        };
        if auth.auth_required(dev_mode) && auth.api_key.is_none() {
            return Err(ConfigError::MissingCredential("API_KEY"));
        }

        let cors_origins = match get("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            dev_mode,
            auth,
            providers: ProviderKeys {
                openrouter_api_key: get("OPENROUTER_API_KEY"),
                exa_api_key: get("EXA_API_KEY"),
            },
            default_model: get("DEFAULT_MODEL").unwrap_or(defaults.default_model),
            max_followup_queries,
            factor_templates_path: get("FACTOR_TEMPLATES_PATH").map(PathBuf::from),
            cors_origins,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
