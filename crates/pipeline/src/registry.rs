//! Agent registry: every configured agent, built and ready to run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agrag_config::{AgentConfig, AppConfig, PipelineConfig, RagConfig};
use agrag_core::agent::{Agent, AgentDescriptor};
use agrag_core::error::Error;
use agrag_core::session::SessionState;
use agrag_providers::ProviderRouter;
use tracing::{debug, info};

use crate::chain::{ChainAgent, ChainStep};
use crate::direct::DirectAgent;
use crate::query_gen::QueryGenerator;
use crate::rag::RagPipeline;
use crate::retriever::MultiQueryRetriever;
use crate::router::CoordinatorAgent;
use crate::stage::StageModel;
use crate::synthesizer::Synthesizer;
use crate::triage::TriageClassifier;

#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
    initial_values: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. A later agent with the same name replaces it.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.retain(|a| a.name() != agent.name());
        self.agents.push(agent);
    }

    /// Register an agent whose threads start with `values`.
    pub fn register_with_state(
        &mut self,
        agent: Arc<dyn Agent>,
        values: serde_json::Map<String, serde_json::Value>,
    ) {
        self.initial_values.insert(agent.name().to_string(), values);
        self.register(agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.name() == name).cloned()
    }

    /// The agent mounted on `path` (leading and trailing slashes ignored).
    pub fn by_path(&self, path: &str) -> Option<Arc<dyn Agent>> {
        let path = path.trim_matches('/');
        self.agents
            .iter()
            .find(|a| a.descriptor().path == path)
            .cloned()
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.agents.iter().map(|a| a.descriptor().clone()).collect()
    }

    /// The state a new thread of `agent` starts with.
    pub fn initial_state(&self, agent: &str) -> SessionState {
        match self.initial_values.get(agent) {
            Some(values) => SessionState::with_values(values.clone()),
            None => SessionState::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Build every configured agent. Coordinators are built last so their
    /// members already exist.
    pub fn from_config(config: &AppConfig, providers: &ProviderRouter) -> Result<Self, Error> {
        let mut registry = Self::new();

        for agent_config in &config.agents {
            let agent: Arc<dyn Agent> = match &agent_config.pipeline {
                PipelineConfig::Rag(rag) => {
                    Arc::new(build_rag(agent_config, rag, config, providers)?)
                }
                PipelineConfig::Direct(direct) => {
                    let model = stage_model(
                        config,
                        providers,
                        direct.model.as_deref(),
                        direct.temperature,
                        direct.timeout_ms,
                    )?;
                    Arc::new(DirectAgent::new(descriptor(agent_config), model, &direct.prompt))
                }
                PipelineConfig::Chain(chain) => {
                    let steps = chain
                        .steps
                        .iter()
                        .map(|step| {
                            let model = stage_model(
                                config,
                                providers,
                                step.model.as_deref().or(chain.model.as_deref()),
                                None,
                                chain.timeout_ms,
                            )?;
                            Ok(ChainStep {
                                name: step.name.clone(),
                                template: step.prompt.clone(),
                                output_key: step.output_key.clone(),
                                model,
                            })
                        })
                        .collect::<Result<Vec<_>, Error>>()?;
                    Arc::new(ChainAgent::new(descriptor(agent_config), steps))
                }
                PipelineConfig::Coordinator(_) => continue,
            };
            debug!(agent = %agent_config.name, kind = agent_config.pipeline.kind(), "Built agent");
            registry.register_with_state(agent, agent_config.initial_state.clone());
        }

        for agent_config in &config.agents {
            let PipelineConfig::Coordinator(coordinator) = &agent_config.pipeline else {
                continue;
            };
            let member_names: Vec<String> = if coordinator.members.is_empty() {
                config
                    .agents
                    .iter()
                    .filter(|a| !matches!(a.pipeline, PipelineConfig::Coordinator(_)))
                    .map(|a| a.name.clone())
                    .filter(|name| Some(name) != coordinator.default_agent.as_ref())
                    .collect()
            } else {
                coordinator.members.clone()
            };
            let members = member_names
                .iter()
                .map(|name| registry.lookup(name))
                .collect::<Result<Vec<_>, Error>>()?;
            let fallback = coordinator
                .default_agent
                .as_deref()
                .map(|name| registry.lookup(name))
                .transpose()?;

            let agent = CoordinatorAgent::new(
                descriptor(agent_config),
                members,
                fallback,
                coordinator.min_keyword_hits,
            );
            registry.register_with_state(Arc::new(agent), agent_config.initial_state.clone());
        }

        info!(agents = registry.len(), "Agent registry ready");
        Ok(registry)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Agent>, Error> {
        self.get(name).ok_or_else(|| Error::Config {
            message: format!("unknown agent '{name}'"),
        })
    }
}

fn descriptor(config: &AgentConfig) -> AgentDescriptor {
    AgentDescriptor::new(&config.name, &config.description)
        .with_path(config.endpoint_path())
        .with_keywords(config.keywords.iter().cloned())
}

fn build_rag(
    agent: &AgentConfig,
    rag: &RagConfig,
    config: &AppConfig,
    providers: &ProviderRouter,
) -> Result<RagPipeline, Error> {
    let timeouts = &rag.timeouts;

    let triage = if rag.triage {
        let model = stage_model(
            config,
            providers,
            rag.models.triage.as_deref().or(rag.model.as_deref()),
            rag.temperature,
            timeouts.triage_ms,
        )?;
        Some(TriageClassifier::new(model, &rag.persona))
    } else {
        None
    };

    let generator = QueryGenerator::new(
        stage_model(
            config,
            providers,
            rag.models.query_generation.as_deref().or(rag.model.as_deref()),
            rag.temperature,
            timeouts.query_generation_ms,
        )?,
        rag.query_count,
    );

    let index = agrag_retrieval::build_index(&rag.source, config, providers)?;
    let retriever = MultiQueryRetriever::new(
        index,
        rag.top_k,
        Duration::from_millis(timeouts.retrieval_ms),
    );

    let synthesizer = Synthesizer::new(
        stage_model(
            config,
            providers,
            rag.models.synthesis.as_deref().or(rag.model.as_deref()),
            rag.temperature,
            timeouts.synthesis_ms,
        )?,
        &rag.persona,
    );

    Ok(RagPipeline::new(
        descriptor(agent),
        triage,
        generator,
        retriever,
        synthesizer,
    ))
}

/// Resolve a `provider/model` id (or the configured default) to a stage model.
fn stage_model(
    config: &AppConfig,
    providers: &ProviderRouter,
    model: Option<&str>,
    temperature: Option<f32>,
    timeout_ms: u64,
) -> Result<StageModel, Error> {
    let id = model.unwrap_or(&config.default_model);
    let (provider, bare_model) = providers.resolve(id).ok_or_else(|| Error::Config {
        message: format!("no provider available for model '{id}'"),
    })?;
    Ok(StageModel::new(provider, bare_model)
        .with_temperature(temperature.unwrap_or(config.default_temperature))
        .with_max_tokens(config.default_max_tokens)
        .with_timeout(Duration::from_millis(timeout_ms)))
}
