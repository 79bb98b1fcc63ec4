//! Configuration loading from skiff.toml.

use std::collections::BTreeMap;
use std::path::Path;

use mcp::ServiceConfig;
use policy::ToolFilter;
use runtime::{AnthropicBackend, DEFAULT_MAX_ROUNDS};
use serde::Deserialize;

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_SYSTEM_PROMPT: &str = "You are Skiff, a helpful assistant. Use the available tools \
when they help answer the question, then answer concisely.";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Tool services by name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    /// Which remote tools may be offered. Absent allows all of them.
    #[serde(default)]
    pub allow: Option<ToolFilter>,
}

/// Backend provider configuration.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Provider name (currently only "anthropic" supported).
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Falls back to the `ANTHROPIC_API_KEY` environment variable.
    pub api_key: Option<String>,

    /// Override the messages endpoint.
    pub url: Option<String>,

    pub max_tokens: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            url: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string. Service endpoints and headers
    /// are checked here so a bad entry fails before anything connects.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.backend.provider != "anthropic" {
            return Err(ConfigError::UnsupportedProvider(config.backend.provider));
        }
        for (name, service) in &config.services {
            service.validate().map_err(|e| ConfigError::Service {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(config)
    }

    /// API key from the config file, else from the environment.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.backend
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn build_backend(&self) -> Result<AnthropicBackend, ConfigError> {
        let mut builder = AnthropicBackend::builder(self.api_key()?, &self.backend.model);
        if let Some(url) = &self.backend.url {
            builder = builder.url(url);
        }
        if let Some(max_tokens) = self.backend.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        Ok(builder.build())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),

    #[error("service '{name}': {reason}")]
    Service { name: String, reason: String },

    #[error("no API key: set backend.api_key or {API_KEY_ENV}")]
    MissingApiKey,
}
