//! `agrag ask`: Run one turn locally and print its events.
//!
//! Stage progress goes to stderr, the answer to stdout.

use std::io::Write;
use std::path::Path;

use agrag_core::agent::Turn;
use agrag_core::event::{EventSink, TurnEvent};
use agrag_core::message::ThreadId;
use agrag_pipeline::AgentRegistry;
use tokio::sync::mpsc;
use tracing::debug;

use super::load_config;

pub async fn run(
    config_path: Option<&Path>,
    agent_name: &str,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    if !config.has_api_key() {
        eprintln!("  Warning: no API key configured (set OPENAI_API_KEY or AGRAG_API_KEY)");
    }

    let providers = agrag_providers::build_from_config(&config);
    let registry = AgentRegistry::from_config(&config, &providers)?;
    let agent = registry
        .get(agent_name)
        .or_else(|| registry.by_path(agent_name))
        .ok_or_else(|| format!("Unknown agent '{agent_name}'. Run `agrag agents` to list them."))?;

    debug!(agent = %agent.name(), "Running one turn");
    let (events, rx) = EventSink::channel(64);
    let printer = tokio::spawn(print_events(rx));

    let mut turn = Turn::new(ThreadId::new(), message)
        .with_state(registry.initial_state(agent.name()))
        .with_events(events);
    let result = agent.execute(&mut turn).await;
    let usage = turn.usage.clone();
    drop(turn);
    printer.await?;

    match result {
        Ok(outcome) => {
            eprintln!(
                "  [{}] {:?}, {} tokens",
                outcome.agent, outcome.kind, usage.total_tokens
            );
            Ok(())
        }
        Err(e) => Err(format!("{} ({e})", e.user_message()).into()),
    }
}

async fn print_events(mut rx: mpsc::Receiver<TurnEvent>) {
    let mut answered = false;
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Routed { agent, reason } => eprintln!("  → {agent} ({reason})"),
            TurnEvent::StageStarted { stage } => eprintln!("  [{stage}] …"),
            TurnEvent::StageCompleted {
                stage,
                elapsed_ms,
                detail,
            } => {
                if detail.is_null() {
                    eprintln!("  [{stage}] {elapsed_ms} ms");
                } else {
                    eprintln!("  [{stage}] {elapsed_ms} ms {detail}");
                }
            }
            TurnEvent::TextDelta { delta } => {
                if !answered {
                    eprintln!();
                    answered = true;
                }
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            _ => {}
        }
    }
    if answered {
        println!();
        eprintln!();
    }
}
