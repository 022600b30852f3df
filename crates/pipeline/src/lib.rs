//! # agrag pipeline
//!
//! The agents agrag serves:
//!
//! 1. **RAG pipeline**: triage → query generation → multi-query retrieval
//!    → synthesis, one state-machine step per stage
//! 2. **Direct agent**: one persona prompt, one model call
//! 3. **Prompt chain**: ordered steps writing named session values
//! 4. **Coordinator**: keyword routing to one of the above
//!
//! [`AgentRegistry::from_config`] builds them all from configuration.

pub mod chain;
pub mod direct;
pub mod prompts;
pub mod query_gen;
pub mod rag;
pub mod registry;
pub mod retriever;
pub mod router;
pub mod stage;
pub mod synthesizer;
pub mod triage;

pub use chain::{ChainAgent, ChainStep};
pub use direct::DirectAgent;
pub use query_gen::QueryGenerator;
pub use rag::RagPipeline;
pub use registry::AgentRegistry;
pub use retriever::MultiQueryRetriever;
pub use router::{CoordinatorAgent, KeywordRouter, Route};
pub use stage::StageModel;
pub use synthesizer::Synthesizer;
pub use triage::TriageClassifier;

#[cfg(test)]
pub(crate) mod test_helpers;
