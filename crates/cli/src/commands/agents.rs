//! `agrag agents`: List configured agents and their endpoints.

use std::path::Path;

use agrag_config::{AgentConfig, PipelineConfig};

use super::load_config;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;

    println!("Agents ({})", config.agents.len());
    println!();
    for agent in &config.agents {
        println!(
            "  {:<16} {:<12} POST /{}",
            agent.name,
            agent.pipeline.kind(),
            agent.endpoint_path()
        );
        if !agent.description.is_empty() {
            println!("  {:<16} {}", "", agent.description);
        }
        if let Some(detail) = detail(agent) {
            println!("  {:<16} {detail}", "");
        }
    }

    Ok(())
}

fn detail(agent: &AgentConfig) -> Option<String> {
    match &agent.pipeline {
        PipelineConfig::Rag(rag) => Some(format!(
            "queries: {}, top_k: {}, source: {}",
            rag.query_count,
            rag.top_k,
            rag.source.kind()
        )),
        PipelineConfig::Chain(chain) => Some(format!(
            "steps: {}",
            chain
                .steps
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(" → ")
        )),
        PipelineConfig::Coordinator(coordinator) if !coordinator.members.is_empty() => {
            Some(format!("members: {}", coordinator.members.join(", ")))
        }
        _ => (!agent.keywords.is_empty()).then(|| format!("keywords: {}", agent.keywords.join(", "))),
    }
}
