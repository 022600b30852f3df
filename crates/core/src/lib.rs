//! # agrag core
//!
//! Domain types, traits, and error definitions for the triage → retrieval →
//! synthesis runtime. This crate has **no framework dependencies**; it
//! defines the domain model every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (chat model, embedding service, vector index,
//! web search) is a trait here. Implementations live in their own crates.
//! Pipeline stages talk to each other only through the typed
//! [`SessionState`], never through ad hoc string keys.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod passage;
pub mod provider;
pub mod search;
pub mod session;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, AgentDescriptor, OutcomeKind, Turn, TurnOutcome};
pub use error::{Error, PipelineError, ProviderError, Result, RetrievalError, Stage};
pub use event::{EventSink, TurnEvent};
pub use message::{Conversation, Message, Role, ThreadId};
pub use passage::{Passage, QueryGroup, QuerySet, RetrievalSet};
pub use provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, StreamChunk,
    Usage,
};
pub use search::SearchIndex;
pub use session::{SessionState, TriageLabel, TriageVerdict, TurnPhase};
