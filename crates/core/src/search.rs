//! Search-index capability: "(query) → ranked passages".
//!
//! Vector databases, web search APIs, and in-memory indexes all implement
//! [`SearchIndex`]. The retriever fans out one call per generated query.

use crate::error::RetrievalError;
use crate::passage::Passage;
use async_trait::async_trait;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// A short name for logs and error attribution (e.g. "pinecone:iax-documentation").
    fn name(&self) -> &str;

    /// Return up to `top_k` passages relevant to `query`, best first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError>;
}
