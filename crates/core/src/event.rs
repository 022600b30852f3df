//! Turn events streamed to clients while an agent runs.
//!
//! Agents push [`TurnEvent`]s into an [`EventSink`]; the gateway forwards
//! them as Server-Sent Events and the CLI prints them. Exactly one of
//! `RunFinished` / `RunError` ends a run.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{PipelineError, Stage};
use crate::provider::Usage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TurnEvent {
    RunStarted {
        thread_id: String,
        run_id: String,
        agent: String,
    },

    /// A pipeline stage began its external call.
    StageStarted { stage: Stage },

    StageCompleted {
        stage: Stage,
        elapsed_ms: u64,
        /// Stage-specific summary (label, queries, passage counts …).
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        detail: serde_json::Value,
    },

    /// The coordinator picked an agent for this turn.
    Routed { agent: String, reason: String },

    /// A piece of the final answer.
    TextDelta { delta: String },

    StateSnapshot { snapshot: serde_json::Value },

    RunFinished {
        thread_id: String,
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    RunError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
        message: String,
        retryable: bool,
    },
}

impl TurnEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::StageStarted { .. } => "stage_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::Routed { .. } => "routed",
            Self::TextDelta { .. } => "text_delta",
            Self::StateSnapshot { .. } => "state_snapshot",
            Self::RunFinished { .. } => "run_finished",
            Self::RunError { .. } => "run_error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }

    /// The terminal event for a failed run.
    pub fn from_error(err: &PipelineError) -> Self {
        Self::RunError {
            stage: err.stage(),
            message: err.user_message(),
            retryable: err.is_retryable(),
        }
    }
}

/// Where agents send their events. A detached sink drops everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TurnEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink plus the receiving end, for callers that consume events.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TurnEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Send an event. A receiver that went away is not an error here; the
    /// caller notices the disconnect through [`EventSink::closed`].
    pub async fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }

    /// Resolves once the receiver is dropped. Never resolves when detached.
    pub async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }
}
