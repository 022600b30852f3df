//! Keyword router and the coordinator agent built on it.
//!
//! The router scores each candidate by how many of its keywords occur in
//! the utterance (case and accent insensitive, whole words). The best
//! candidate wins when it reaches the threshold; otherwise the default
//! agent takes the turn. The coordinator only routes; it never retrieves
//! or synthesizes itself.

use std::collections::HashMap;
use std::sync::Arc;

use agrag_core::agent::{Agent, AgentDescriptor, Turn, TurnOutcome};
use agrag_core::error::PipelineError;
use agrag_core::event::TurnEvent;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// A routing decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub agent: String,
    /// Keywords that matched; empty when the default agent was chosen.
    pub matched: Vec<String>,
}

impl Route {
    pub fn reason(&self) -> String {
        if self.matched.is_empty() {
            "default".into()
        } else {
            format!("keywords: {}", self.matched.join(", "))
        }
    }
}

pub struct KeywordRouter {
    candidates: Vec<AgentDescriptor>,
    default_agent: Option<String>,
    min_hits: usize,
}

impl KeywordRouter {
    pub fn new(candidates: Vec<AgentDescriptor>) -> Self {
        Self {
            candidates,
            default_agent: None,
            min_hits: 1,
        }
    }

    pub fn with_default(mut self, agent: Option<String>) -> Self {
        self.default_agent = agent;
        self
    }

    pub fn with_min_hits(mut self, min_hits: usize) -> Self {
        self.min_hits = min_hits.max(1);
        self
    }

    pub fn candidates(&self) -> &[AgentDescriptor] {
        &self.candidates
    }

    /// Pick exactly one agent, or `None` when nothing matched and there is
    /// no default. Ties go to the candidate listed first.
    pub fn route(&self, utterance: &str) -> Option<Route> {
        let words = tokenize(utterance);

        let mut best: Option<(&AgentDescriptor, Vec<String>)> = None;
        for candidate in &self.candidates {
            let matched: Vec<String> = candidate
                .keywords
                .iter()
                .filter(|k| contains_phrase(&words, &tokenize(k)))
                .cloned()
                .collect();
            let better = match &best {
                Some((_, current)) => matched.len() > current.len(),
                None => !matched.is_empty(),
            };
            if better {
                best = Some((candidate, matched));
            }
        }

        match best {
            Some((candidate, matched)) if matched.len() >= self.min_hits => Some(Route {
                agent: candidate.name.clone(),
                matched,
            }),
            _ => self.default_agent.clone().map(|agent| Route {
                agent,
                matched: Vec::new(),
            }),
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(fold)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && words.windows(phrase.len()).any(|w| w == phrase)
}

/// Lowercase and drop Spanish diacritics.
fn fold(word: &str) -> String {
    word.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Routes each turn to one member agent and lets it run the turn.
pub struct CoordinatorAgent {
    descriptor: AgentDescriptor,
    router: KeywordRouter,
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl CoordinatorAgent {
    /// `members` are routed by keyword; `fallback` only takes turns nothing
    /// else matched.
    pub fn new(
        descriptor: AgentDescriptor,
        members: Vec<Arc<dyn Agent>>,
        fallback: Option<Arc<dyn Agent>>,
        min_hits: usize,
    ) -> Self {
        let candidates = members.iter().map(|a| a.descriptor().clone()).collect();
        let router = KeywordRouter::new(candidates)
            .with_default(fallback.as_ref().map(|a| a.name().to_string()))
            .with_min_hits(min_hits);

        let agents = members
            .into_iter()
            .chain(fallback)
            .map(|a| (a.name().to_string(), a))
            .collect();

        Self {
            descriptor,
            router,
            agents,
        }
    }

    /// The agents this coordinator can delegate to, in routing order.
    pub fn members(&self) -> &[AgentDescriptor] {
        self.router.candidates()
    }
}

#[async_trait]
impl Agent for CoordinatorAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, turn: &mut Turn) -> Result<TurnOutcome, PipelineError> {
        let route = self
            .router
            .route(&turn.utterance)
            .ok_or_else(|| PipelineError::UnknownAgent("no agent matched and no default".into()))?;
        let agent = self
            .agents
            .get(&route.agent)
            .ok_or_else(|| PipelineError::UnknownAgent(route.agent.clone()))?;

        let reason = route.reason();
        info!(
            coordinator = %self.descriptor.name,
            agent = %route.agent,
            %reason,
            thread_id = %turn.thread_id,
            "Routed turn"
        );
        turn.events
            .emit(TurnEvent::Routed {
                agent: route.agent.clone(),
                reason,
            })
            .await;

        agent.execute(turn).await
    }
}
