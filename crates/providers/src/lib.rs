//! LLM Provider implementations for agrag.
//!
//! All providers implement the `agrag_core::Provider` trait.
//! The router selects the correct provider for a `provider/model` id.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};
