//! Multi-query retriever: one search per query, all in flight at once.

use std::sync::Arc;
use std::time::Duration;

use agrag_core::error::RetrievalError;
use agrag_core::passage::{QueryGroup, QuerySet, RetrievalSet};
use agrag_core::search::SearchIndex;
use futures::future::join_all;
use tracing::{debug, warn};

pub struct MultiQueryRetriever {
    index: Arc<dyn SearchIndex>,
    top_k: usize,
    timeout: Duration,
}

impl MultiQueryRetriever {
    pub fn new(index: Arc<dyn SearchIndex>, top_k: usize, timeout: Duration) -> Self {
        Self {
            index,
            top_k: top_k.max(1),
            timeout,
        }
    }

    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    /// Search every query and wait for all of them. A failed or timed-out
    /// query becomes an empty group carrying the reason; the groups come
    /// back in query order whatever order the searches finish in.
    pub async fn retrieve(&self, queries: &QuerySet) -> RetrievalSet {
        let searches = queries
            .iter()
            .enumerate()
            .map(|(i, query)| self.search_one(i, query));
        let groups = join_all(searches).await;

        let set = RetrievalSet::new(groups);
        debug!(
            index = self.index.name(),
            queries = queries.len(),
            passages = set.passage_count(),
            failed = set.failed_queries(),
            "Retrieval fan-in complete"
        );
        set
    }

    async fn search_one(&self, query_index: usize, query: &str) -> QueryGroup {
        let result = match tokio::time::timeout(self.timeout, self.index.search(query, self.top_k)).await
        {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(mut passages) => {
                passages.truncate(self.top_k);
                for passage in &mut passages {
                    passage.query_index = Some(query_index);
                }
                QueryGroup {
                    query: query.to_string(),
                    passages,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    index = self.index.name(),
                    query_index,
                    query,
                    error = %e,
                    "Search failed; treating as zero results"
                );
                QueryGroup {
                    query: query.to_string(),
                    passages: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
