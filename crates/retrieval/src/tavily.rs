//! Tavily web search.

use agrag_core::error::RetrievalError;
use agrag_core::passage::Passage;
use agrag_core::search::SearchIndex;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";
const MAX_RESULTS_LIMIT: usize = 20;

pub struct TavilyIndex {
    api_key: Option<String>,
    search_depth: String,
    endpoint: String,
    client: reqwest::Client,
}

impl TavilyIndex {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            search_depth: "advanced".into(),
            endpoint: TAVILY_SEARCH_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn search_depth(mut self, depth: impl Into<String>) -> Self {
        self.search_depth = depth.into();
        self
    }

    /// Point at a different endpoint (self-hosted proxy, tests).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, query: &str, top_k: usize) -> serde_json::Value {
        serde_json::json!({
            "query": query,
            "max_results": top_k.clamp(1, MAX_RESULTS_LIMIT),
            "search_depth": self.search_depth,
            "include_answer": false,
        })
    }
}

#[async_trait]
impl SearchIndex for TavilyIndex {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(RetrievalError::NotConfigured(
                "tavily: missing TAVILY_API_KEY".into(),
            ));
        };
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.request_body(query, top_k))
            .send()
            .await
            .map_err(|e| RetrievalError::RequestFailed {
                index: "tavily".into(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Status {
                index: "tavily".into(),
                status_code,
                message,
            });
        }

        let parsed: SearchResponse =
            response.json().await.map_err(|e| RetrievalError::MalformedResponse {
                index: "tavily".into(),
                reason: e.to_string(),
            })?;
        let passages = parsed.into_passages(top_k);
        debug!(results = passages.len(), "Tavily search complete");
        Ok(passages)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f32>,
}

impl SearchResponse {
    fn into_passages(self, top_k: usize) -> Vec<Passage> {
        self.results
            .into_iter()
            .filter(|r| !r.content.trim().is_empty())
            .take(top_k)
            .map(|r| {
                let mut passage = Passage::new(r.content.trim(), r.url);
                if !r.title.is_empty() {
                    passage.title = Some(r.title);
                }
                passage.score = r.score;
                passage
            })
            .collect()
    }
}
