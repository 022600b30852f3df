//! Configuration loading, validation, and management for agrag.
//!
//! Loads configuration from `~/.agrag/config.toml` with environment
//! variable overrides. Validates all settings at startup.

pub mod agents;

pub use agents::{
    AgentConfig, ChainConfig, ChainStepConfig, CoordinatorConfig, DirectConfig, DocumentConfig,
    PipelineConfig, RagConfig, SourceConfig, StageModels, StageTimeouts,
};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agrag/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the default provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider used when a model id has no known `provider/` prefix
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used when an agent names none
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Keys for the search services
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default = "agents::default_agents")]
    pub agents: Vec<AgentConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "openai/gpt-4.1-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret for Debug output.
pub(crate) fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("embedding", &self.embedding)
            .field("search", &self.search)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .field("agents", &self.agents)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Embedding model used to vectorize queries for Pinecone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// `provider/model`
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: Option<u32>,
}

fn default_embedding_model() -> String {
    "openai/text-embedding-3-small".into()
}
fn default_embedding_dimensions() -> Option<u32> {
    Some(1536)
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinecone_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("pinecone_api_key", &redact(&self.pinecone_api_key))
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Threads kept in memory before the least recently updated is evicted
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Earlier messages handed to agents as context
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".into(),
        "http://127.0.0.1:3000".into(),
        "http://localhost:1111".into(),
    ]
}
fn default_max_threads() -> usize {
    1000
}
fn default_history_window() -> usize {
    20
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: default_cors_origins(),
            max_threads: default_max_threads(),
            history_window: default_history_window(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.agrag/config.toml).
    ///
    /// Also checks environment variables (after loading any `.env`):
    /// - `AGRAG_API_KEY`, `AGRAG_PROVIDER`, `AGRAG_MODEL`, `AGRAG_PORT`
    /// - `OPENAI_API_KEY`, `GEMINI_API_KEY` / `GOOGLE_API_KEY`, `OPENROUTER_API_KEY`
    /// - `PINECONE_API_KEY`, `TAVILY_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_path(&Self::config_path())
    }

    /// Load from `path`, then apply environment overrides and validate.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Keys already present in
    /// the file win for secrets; `AGRAG_*` selectors always win.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = lookup("AGRAG_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = lookup("AGRAG_MODEL") {
            self.default_model = model;
        }
        if let Some(port) = lookup("AGRAG_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid AGRAG_PORT"),
            }
        }
        if self.api_key.is_none() {
            self.api_key = lookup("AGRAG_API_KEY");
        }

        let provider_keys = [
            ("openai", lookup("OPENAI_API_KEY")),
            (
                "gemini",
                lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")),
            ),
            ("openrouter", lookup("OPENROUTER_API_KEY")),
        ];
        for (name, key) in provider_keys {
            let Some(key) = key else { continue };
            let entry = self
                .providers
                .entry(name.to_string())
                .or_insert_with(|| ProviderConfig {
                    api_key: None,
                    api_url: None,
                    default_model: None,
                });
            if entry.api_key.is_none() {
                entry.api_key = Some(key);
            }
        }

        if self.search.pinecone_api_key.is_none() {
            self.search.pinecone_api_key = lookup("PINECONE_API_KEY");
        }
        if self.search.tavily_api_key.is_none() {
            self.search.tavily_api_key = lookup("TAVILY_API_KEY");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agrag")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.gateway.body_limit_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.body_limit_bytes must be > 0".into(),
            ));
        }

        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("agent name must not be empty".into()));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
            let path = agent.endpoint_path();
            if path.is_empty() || path.contains('/') || RESERVED_PATHS.contains(&path.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}' has an unusable path '{path}'",
                    agent.name
                )));
            }
            if !paths.insert(path.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate agent path '{path}'"
                )));
            }
            self.validate_agent(agent)?;
        }

        for agent in &self.agents {
            if let PipelineConfig::Coordinator(coordinator) = &agent.pipeline {
                let referenced = coordinator
                    .members
                    .iter()
                    .chain(coordinator.default_agent.iter());
                for member in referenced {
                    match self.agent(member) {
                        None => {
                            return Err(ConfigError::ValidationError(format!(
                                "coordinator '{}' references unknown agent '{member}'",
                                agent.name
                            )));
                        }
                        Some(target) if matches!(target.pipeline, PipelineConfig::Coordinator(_)) => {
                            return Err(ConfigError::ValidationError(format!(
                                "coordinator '{}' cannot delegate to coordinator '{member}'",
                                agent.name
                            )));
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_agent(&self, agent: &AgentConfig) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::ValidationError(format!(
                "agent '{}': {reason}",
                agent.name
            )))
        };
        let bad_temperature = |t: Option<f32>| t.is_some_and(|t| !(0.0..=2.0).contains(&t));

        match &agent.pipeline {
            PipelineConfig::Rag(rag) => {
                if rag.query_count == 0 {
                    return invalid("query_count must be >= 1");
                }
                if rag.top_k == 0 {
                    return invalid("top_k must be >= 1");
                }
                if rag.timeouts.any_zero() {
                    return invalid("timeouts must be > 0");
                }
                if bad_temperature(rag.temperature) {
                    return invalid("temperature must be between 0.0 and 2.0");
                }
                if let SourceConfig::Pinecone {
                    index, index_host, ..
                } = &rag.source
                    && index.is_none()
                    && index_host.is_none()
                {
                    return invalid("pinecone source needs `index` or `index_host`");
                }
            }
            PipelineConfig::Direct(direct) => {
                if direct.prompt.trim().is_empty() {
                    return invalid("prompt must not be empty");
                }
                if direct.timeout_ms == 0 {
                    return invalid("timeout_ms must be > 0");
                }
                if bad_temperature(direct.temperature) {
                    return invalid("temperature must be between 0.0 and 2.0");
                }
            }
            PipelineConfig::Chain(chain) => {
                if chain.steps.is_empty() {
                    return invalid("a chain needs at least one step");
                }
                if chain.timeout_ms == 0 {
                    return invalid("timeout_ms must be > 0");
                }
                if chain.steps.iter().any(|s| s.output_key.trim().is_empty()) {
                    return invalid("every step needs an output_key");
                }
            }
            PipelineConfig::Coordinator(coordinator) => {
                if coordinator.min_keyword_hits == 0 {
                    return invalid("min_keyword_hits must be >= 1");
                }
            }
        }
        Ok(())
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// API key for a named provider; the top-level key backs the default provider.
    pub fn provider_api_key(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| {
                (provider == self.default_provider)
                    .then(|| self.api_key.clone())
                    .flatten()
            })
    }

    /// Check if an API key is available for the default provider.
    pub fn has_api_key(&self) -> bool {
        self.provider_api_key(&self.default_provider).is_some()
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::default())
            .map_err(|e| ConfigError::SerializeError(e.to_string()))
    }
}

/// Paths served by the gateway itself.
const RESERVED_PATHS: &[&str] = &["threads", "agents", "health"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
            agents: agents::default_agents(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.gateway.body_limit_bytes, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, "openai/gpt-4.1-mini");
        assert_eq!(parsed.agents.len(), AppConfig::default().agents.len());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "openai");
        assert!(config.agent("coordinator").is_some());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
default_model = "gemini/gemini-2.0-flash"

[gateway]
port = 9100

[[agents]]
name = "docs"
description = "Product docs"

[agents.pipeline]
type = "rag"
query_count = 4

[agents.pipeline.source]
type = "memory"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.gateway.port, 9100);
        assert_eq!(config.agents.len(), 1);
        let PipelineConfig::Rag(rag) = &config.agents[0].pipeline else {
            panic!("expected rag");
        };
        assert_eq!(rag.query_count, 4);
    }

    #[test]
    fn parse_error_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "default_model = [").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[
            ("AGRAG_MODEL", "gemini/gemini-2.0-flash"),
            ("AGRAG_PORT", "9001"),
            ("GOOGLE_API_KEY", "g-key"),
            ("OPENAI_API_KEY", "sk-test"),
            ("PINECONE_API_KEY", "pc-key"),
            ("TAVILY_API_KEY", ""),
        ]));
        assert_eq!(config.default_model, "gemini/gemini-2.0-flash");
        assert_eq!(config.gateway.port, 9001);
        assert_eq!(config.provider_api_key("gemini").as_deref(), Some("g-key"));
        assert_eq!(config.provider_api_key("openai").as_deref(), Some("sk-test"));
        assert_eq!(config.search.pinecone_api_key.as_deref(), Some("pc-key"));
        assert!(config.search.tavily_api_key.is_none());
    }

    #[test]
    fn file_secrets_win_over_env() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("from-file".into()),
                api_url: None,
                default_model: None,
            },
        );
        config.apply_env_overrides(env(&[("OPENAI_API_KEY", "from-env")]));
        assert_eq!(config.provider_api_key("openai").as_deref(), Some("from-file"));
    }

    #[test]
    fn top_level_key_backs_default_provider() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[("AGRAG_API_KEY", "k")]));
        assert!(config.has_api_key());
        assert!(config.provider_api_key("gemini").is_none());
    }

    #[test]
    fn invalid_port_is_ignored() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[("AGRAG_PORT", "not-a-port")]));
        assert_eq!(config.gateway.port, 8000);
    }

    #[test]
    fn duplicate_agent_names_rejected() {
        let mut config = AppConfig::default();
        let dup = config.agents[0].clone();
        config.agents.push(dup);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate agent name"));
    }

    #[test]
    fn reserved_path_rejected() {
        let mut config = AppConfig::default();
        config.agents[0].path = Some("/threads".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_query_count_rejected() {
        let mut config = AppConfig::default();
        if let PipelineConfig::Rag(rag) = &mut config.agents[0].pipeline {
            rag.query_count = 0;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = AppConfig::default();
        if let PipelineConfig::Rag(rag) = &mut config.agents[0].pipeline {
            rag.timeouts.retrieval_ms = 0;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn coordinator_members_must_exist() {
        let mut config = AppConfig::default();
        for agent in &mut config.agents {
            if let PipelineConfig::Coordinator(c) = &mut agent.pipeline {
                c.members.push("ghost".into());
            }
        }
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-very-secret".into());
        config.search.pinecone_api_key = Some("pc-very-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret"));
    }
}
