//! Per-thread session state and the turn state machine.
//!
//! Each pipeline stage writes its output into a typed slot of
//! [`SessionState`] and the next stage reads it back. Slots are cleared at
//! the start of every turn; reading a slot that has not been written yet
//! yields `None` rather than an error. Free-form client state (the
//! `values` map) survives across turns.
//!
//! ```text
//! Start ─► Triaged(GENERAL) ─► Done
//!   │
//!   └────► Triaged(SPECIFIC) ─► QueriesGenerated ─► Retrieved ─► Synthesized ─► Done
//!
//! any non-terminal phase ─► Failed
//! ```

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::passage::{QuerySet, RetrievalSet};

/// Layout version of the serialized state snapshot.
pub const SCHEMA_VERSION: u32 = 1;

/// Triage decision for one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriageLabel {
    /// Answer directly, no retrieval.
    General,
    /// Needs knowledge-base retrieval.
    Specific,
}

impl std::fmt::Display for TriageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => f.write_str("GENERAL"),
            Self::Specific => f.write_str("SPECIFIC"),
        }
    }
}

/// The triage label plus, for `GENERAL`, the direct reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageVerdict {
    pub label: TriageLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

impl TriageVerdict {
    pub fn general(reply: impl Into<String>) -> Self {
        Self {
            label: TriageLabel::General,
            reply: Some(reply.into()),
        }
    }

    pub fn specific() -> Self {
        Self {
            label: TriageLabel::Specific,
            reply: None,
        }
    }
}

/// Where a turn is in the pipeline. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", content = "label", rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Start,
    Triaged(TriageLabel),
    QueriesGenerated,
    Retrieved,
    Synthesized,
    Done,
    Failed,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self -> next` is a legal forward transition.
    ///
    /// `Start -> Done` is allowed for agents that answer without retrieval.
    pub fn can_advance_to(&self, next: TurnPhase) -> bool {
        use TriageLabel::*;
        use TurnPhase::*;
        match (self, next) {
            (Start, Triaged(_)) => true,
            (Start, Done) => true,
            (Triaged(General), Done) => true,
            (Triaged(Specific), QueriesGenerated) => true,
            (QueriesGenerated, Retrieved) => true,
            (Retrieved, Synthesized) => true,
            (Synthesized, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => f.write_str("START"),
            Self::Triaged(label) => write!(f, "TRIAGED({label})"),
            Self::QueriesGenerated => f.write_str("QUERIES_GENERATED"),
            Self::Retrieved => f.write_str("RETRIEVED"),
            Self::Synthesized => f.write_str("SYNTHESIZED"),
            Self::Done => f.write_str("DONE"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// Typed, versioned state shared by the stages of a thread's turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Snapshot layout version.
    pub schema: u32,
    /// Incremented on every write.
    pub version: u64,
    /// Number of turns started on this thread.
    pub turn: u64,
    phase: TurnPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    triage: Option<TriageVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    queries: Option<QuerySet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retrieval: Option<RetrievalSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    /// Free-form values: client state and named outputs of prompt chains.
    #[serde(default)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            version: 0,
            turn: 0,
            phase: TurnPhase::Start,
            triage: None,
            queries: None,
            retrieval: None,
            answer: None,
            values: serde_json::Map::new(),
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh state seeded with initial values.
    pub fn with_values(values: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    /// Clear the per-turn slots and rewind to `Start`.
    pub fn begin_turn(&mut self) {
        self.turn += 1;
        self.phase = TurnPhase::Start;
        self.triage = None;
        self.queries = None;
        self.retrieval = None;
        self.answer = None;
        self.touch();
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn triage(&self) -> Option<&TriageVerdict> {
        self.triage.as_ref()
    }

    pub fn queries(&self) -> Option<&QuerySet> {
        self.queries.as_ref()
    }

    pub fn retrieval(&self) -> Option<&RetrievalSet> {
        self.retrieval.as_ref()
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    pub fn record_triage(&mut self, verdict: TriageVerdict) -> Result<(), PipelineError> {
        self.advance(TurnPhase::Triaged(verdict.label))?;
        self.triage = Some(verdict);
        Ok(())
    }

    pub fn record_queries(&mut self, queries: QuerySet) -> Result<(), PipelineError> {
        self.advance(TurnPhase::QueriesGenerated)?;
        self.queries = Some(queries);
        Ok(())
    }

    /// Store the whole retrieval result in one write.
    pub fn record_retrieval(&mut self, retrieval: RetrievalSet) -> Result<(), PipelineError> {
        self.advance(TurnPhase::Retrieved)?;
        self.retrieval = Some(retrieval);
        Ok(())
    }

    pub fn record_synthesis(&mut self, answer: impl Into<String>) -> Result<(), PipelineError> {
        self.advance(TurnPhase::Synthesized)?;
        self.answer = Some(answer.into());
        Ok(())
    }

    /// Finish the turn. After a `GENERAL` triage the reply becomes the answer.
    pub fn complete(&mut self) -> Result<(), PipelineError> {
        self.advance(TurnPhase::Done)?;
        if self.answer.is_none() {
            self.answer = self.triage.as_ref().and_then(|t| t.reply.clone());
        }
        Ok(())
    }

    /// Finish a turn that never needed retrieval.
    pub fn complete_direct(&mut self, answer: impl Into<String>) -> Result<(), PipelineError> {
        self.advance(TurnPhase::Done)?;
        self.answer = Some(answer.into());
        Ok(())
    }

    /// Mark the turn failed. No-op when the turn already ended.
    pub fn fail(&mut self) {
        if self.phase.can_advance_to(TurnPhase::Failed) {
            self.phase = TurnPhase::Failed;
            self.touch();
        }
    }

    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// The value under `key` rendered as text; missing keys render empty.
    pub fn value_text(&self, key: &str) -> String {
        match self.values.get(key) {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
        self.touch();
    }

    /// Apply a JSON merge patch to `values`: objects merge recursively and
    /// `null` removes a key.
    pub fn merge_values(&mut self, patch: &serde_json::Map<String, serde_json::Value>) {
        for (key, value) in patch {
            if value.is_null() {
                self.values.remove(key);
                continue;
            }
            match self.values.get_mut(key) {
                Some(existing) => merge_json(existing, value),
                None => {
                    self.values.insert(key.clone(), value.clone());
                }
            }
        }
        self.touch();
    }

    fn advance(&mut self, next: TurnPhase) -> Result<(), PipelineError> {
        if !self.phase.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
    }
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    base_map.remove(key);
                } else {
                    merge_json(
                        base_map.entry(key.clone()).or_insert(serde_json::Value::Null),
                        value,
                    );
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}
