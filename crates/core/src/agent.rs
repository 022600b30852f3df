//! The agent contract: every runnable unit (RAG pipeline, direct prompt,
//! prompt chain, coordinator) has a name, a description and `execute`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::event::EventSink;
use crate::message::{Message, ThreadId};
use crate::provider::Usage;
use crate::session::SessionState;

/// Static metadata an agent is registered and routed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    /// One-line description used in listings and routing.
    pub description: String,
    /// HTTP path the gateway mounts the agent on, without the leading slash.
    pub path: String,
    /// Routing keywords for the coordinator.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            description: description.into(),
            keywords: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into().trim_matches('/').to_string();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// One user turn as seen by an agent.
#[derive(Debug)]
pub struct Turn {
    pub thread_id: ThreadId,
    pub run_id: String,
    /// The end-user text for this turn.
    pub utterance: String,
    /// Earlier messages of the thread, oldest first. Excludes `utterance`.
    pub history: Vec<Message>,
    pub state: SessionState,
    pub events: EventSink,
    /// Token usage accumulated across every model call of the turn.
    pub usage: Usage,
}

impl Turn {
    pub fn new(thread_id: ThreadId, utterance: impl Into<String>) -> Self {
        Self {
            thread_id,
            run_id: uuid::Uuid::new_v4().to_string(),
            utterance: utterance.into(),
            history: Vec::new(),
            state: SessionState::new(),
            events: EventSink::detached(),
            usage: Usage::default(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn record_usage(&mut self, usage: Option<&Usage>) {
        if let Some(usage) = usage {
            self.usage.accumulate(usage);
        }
    }
}

/// How a turn's answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Triage answered directly.
    General,
    /// Synthesized from retrieved passages.
    Synthesized,
    /// Nothing was retrieved; the insufficient-information answer.
    Insufficient,
    /// A single prompt or prompt chain produced the answer.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Name of the agent that produced the answer.
    pub agent: String,
    pub answer: String,
    pub kind: OutcomeKind,
    /// Sources cited in the answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl TurnOutcome {
    pub fn new(agent: impl Into<String>, answer: impl Into<String>, kind: OutcomeKind) -> Self {
        Self {
            agent: agent.into(),
            answer: answer.into(),
            kind,
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn description(&self) -> &str {
        &self.descriptor().description
    }

    /// Run one turn. Stage outputs go to `turn.state`; the answer is both
    /// streamed through `turn.events` and returned.
    async fn execute(&self, turn: &mut Turn) -> Result<TurnOutcome, PipelineError>;
}
