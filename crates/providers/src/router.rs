//! Provider router: selects the LLM provider for a `provider/model` id.
//!
//! `gemini/gemini-2.0-flash` goes to the registered `gemini` provider with
//! model `gemini-2.0-flash`. An id whose prefix is not a registered
//! provider (`anthropic/claude-sonnet-4` on OpenRouter) goes whole to the
//! default provider.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use agrag_config::{AppConfig, PipelineConfig};
use agrag_core::provider::Provider;
use tracing::{debug, warn};

use crate::openai_compat::{
    GEMINI_BASE_URL, OLLAMA_BASE_URL, OPENAI_BASE_URL, OPENROUTER_BASE_URL, OpenAiCompatProvider,
};

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn default_provider(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve a model id to the provider serving it and the bare model name.
    pub fn resolve(&self, model: &str) -> Option<(Arc<dyn Provider>, String)> {
        if let Some((prefix, rest)) = model.split_once('/')
            && !rest.is_empty()
            && let Some(provider) = self.providers.get(prefix)
        {
            return Some((provider.clone(), rest.to_string()));
        }
        self.default_provider().map(|p| (p, model.to_string()))
    }

    /// Registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Registers every configured provider, the default provider, and every
/// well-known provider named as a prefix of a model id the agents use.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    let mut names: BTreeSet<String> = config.providers.keys().cloned().collect();
    names.insert(config.default_provider.clone());
    for model in referenced_models(config) {
        if let Some((prefix, _)) = model.split_once('/')
            && is_well_known(prefix)
        {
            names.insert(prefix.to_string());
        }
    }

    for name in names {
        let provider_config = config.providers.get(&name);
        let base_url = provider_config
            .and_then(|p| p.api_url.clone())
            .or_else(|| default_base_url(&name).map(String::from));
        let Some(base_url) = base_url else {
            warn!(provider = %name, "No api_url configured for unknown provider, skipping");
            continue;
        };
        let api_key = config.provider_api_key(&name).unwrap_or_default();
        if api_key.is_empty() && name != "ollama" {
            warn!(provider = %name, "No API key configured; calls will fail to authenticate");
        }
        debug!(provider = %name, %base_url, "Registering provider");
        router.register(
            name.clone(),
            Arc::new(OpenAiCompatProvider::new(&name, base_url, api_key)),
        );
    }

    router
}

fn referenced_models(config: &AppConfig) -> Vec<&str> {
    let mut models = vec![config.default_model.as_str(), config.embedding.model.as_str()];
    for agent in &config.agents {
        match &agent.pipeline {
            PipelineConfig::Rag(rag) => {
                models.extend(rag.model.as_deref());
                models.extend(rag.models.triage.as_deref());
                models.extend(rag.models.query_generation.as_deref());
                models.extend(rag.models.synthesis.as_deref());
            }
            PipelineConfig::Direct(direct) => models.extend(direct.model.as_deref()),
            PipelineConfig::Chain(chain) => {
                models.extend(chain.model.as_deref());
                models.extend(chain.steps.iter().filter_map(|s| s.model.as_deref()));
            }
            PipelineConfig::Coordinator(_) => {}
        }
    }
    models
}

fn is_well_known(name: &str) -> bool {
    default_base_url(name).is_some()
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> Option<&'static str> {
    match provider_name {
        "openai" => Some(OPENAI_BASE_URL),
        "gemini" | "google" => Some(GEMINI_BASE_URL),
        "openrouter" => Some(OPENROUTER_BASE_URL),
        "ollama" => Some(OLLAMA_BASE_URL),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openai");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")));

        assert!(router.get("openai").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default_provider().is_some());
    }

    #[test]
    fn resolve_strips_registered_prefix() {
        let mut router = ProviderRouter::new("openai");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("k")));
        router.register("gemini", Arc::new(OpenAiCompatProvider::gemini("k")));

        let (provider, model) = router.resolve("gemini/gemini-2.0-flash").unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(model, "gemini-2.0-flash");

        let (provider, model) = router.resolve("gpt-4.1-mini").unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(model, "gpt-4.1-mini");
    }

    #[test]
    fn unknown_prefix_goes_whole_to_default() {
        let mut router = ProviderRouter::new("openrouter");
        router.register("openrouter", Arc::new(OpenAiCompatProvider::openrouter("k")));
        let (provider, model) = router.resolve("anthropic/claude-sonnet-4").unwrap();
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(model, "anthropic/claude-sonnet-4");
    }

    #[test]
    fn resolve_without_default_is_none() {
        let router = ProviderRouter::new("openai");
        assert!(router.resolve("gpt-4.1-mini").is_none());
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("gemini").unwrap().contains("generativelanguage"));
        assert!(default_base_url("ollama").unwrap().contains("localhost:11434"));
        assert!(default_base_url("mystery").is_none());
    }

    #[test]
    fn build_from_default_config_registers_referenced_providers() {
        let config = AppConfig::default();
        let router = build_from_config(&config);
        assert!(router.default_provider().is_some());
        let names = router.list();
        assert!(names.contains(&"openai"));
        assert!(names.contains(&"gemini"));
    }
}
