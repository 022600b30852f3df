//! Pinecone vector search.
//!
//! Each query is embedded through a [`Provider`] and sent to the index's
//! data-plane `/query` endpoint. When only an index name is configured the
//! host is looked up once through the control plane and cached.

use std::sync::Arc;

use agrag_core::error::RetrievalError;
use agrag_core::passage::Passage;
use agrag_core::provider::{EmbeddingRequest, Provider};
use agrag_core::search::SearchIndex;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";

pub struct PineconeIndex {
    name: String,
    index_name: Option<String>,
    host: OnceCell<String>,
    namespace: Option<String>,
    filter: Option<serde_json::Value>,
    api_key: Option<String>,
    embedder: Arc<dyn Provider>,
    embedding_model: String,
    dimensions: Option<u32>,
    control_plane_url: String,
    client: reqwest::Client,
}

impl PineconeIndex {
    /// An index addressed by name; the host is resolved on first search.
    pub fn new(
        index_name: impl Into<String>,
        embedder: Arc<dyn Provider>,
        embedding_model: impl Into<String>,
    ) -> Self {
        let index_name = index_name.into();
        Self {
            name: format!("pinecone:{index_name}"),
            index_name: Some(index_name),
            host: OnceCell::new(),
            namespace: None,
            filter: None,
            api_key: None,
            embedder,
            embedding_model: embedding_model.into(),
            dimensions: None,
            control_plane_url: CONTROL_PLANE_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    /// An index addressed by its data-plane host.
    pub fn with_host(
        host: impl Into<String>,
        embedder: Arc<dyn Provider>,
        embedding_model: impl Into<String>,
    ) -> Self {
        let host = normalize_host(&host.into());
        Self {
            name: format!("pinecone:{host}"),
            index_name: None,
            host: OnceCell::new_with(Some(host)),
            namespace: None,
            filter: None,
            api_key: None,
            embedder,
            embedding_model: embedding_model.into(),
            dimensions: None,
            control_plane_url: CONTROL_PLANE_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn filter(mut self, filter: Option<serde_json::Value>) -> Self {
        self.filter = filter;
        self
    }

    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn dimensions(mut self, dimensions: Option<u32>) -> Self {
        self.dimensions = dimensions;
        self
    }

    fn key(&self) -> Result<&str, RetrievalError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| RetrievalError::NotConfigured(format!("{}: missing PINECONE_API_KEY", self.name)))
    }

    async fn host(&self) -> Result<&str, RetrievalError> {
        self.host
            .get_or_try_init(|| self.describe_index())
            .await
            .map(String::as_str)
    }

    async fn describe_index(&self) -> Result<String, RetrievalError> {
        let Some(index_name) = &self.index_name else {
            return Err(RetrievalError::NotConfigured(format!(
                "{}: no index name or host",
                self.name
            )));
        };
        let url = format!("{}/indexes/{index_name}", self.control_plane_url);
        debug!(index = %index_name, "Resolving Pinecone index host");

        let response = self
            .client
            .get(&url)
            .header("Api-Key", self.key()?)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;
        let response = self.check_status(response).await?;

        let described: DescribeIndexResponse =
            response.json().await.map_err(|e| RetrievalError::MalformedResponse {
                index: self.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(normalize_host(&described.host))
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        let response = self
            .embedder
            .embed(EmbeddingRequest {
                model: self.embedding_model.clone(),
                inputs: vec![query.to_string()],
                dimensions: self.dimensions,
            })
            .await?;
        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::MalformedResponse {
                index: self.name.clone(),
                reason: "embedding service returned no vectors".into(),
            })
    }

    fn query_body(&self, vector: Vec<f32>, top_k: usize) -> serde_json::Value {
        let mut body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": false,
        });
        if let Some(namespace) = &self.namespace {
            body["namespace"] = serde_json::json!(namespace);
        }
        if let Some(filter) = &self.filter {
            body["filter"] = filter.clone();
        }
        body
    }

    fn request_failed(&self, e: reqwest::Error) -> RetrievalError {
        RetrievalError::RequestFailed {
            index: self.name.clone(),
            reason: e.to_string(),
        }
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RetrievalError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status_code = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(RetrievalError::Status {
            index: self.name.clone(),
            status_code,
            message,
        })
    }
}

#[async_trait]
impl SearchIndex for PineconeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let api_key = self.key()?;
        let host = self.host().await?;
        let vector = self.embed(query).await?;

        let response = self
            .client
            .post(format!("{host}/query"))
            .header("Api-Key", api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&self.query_body(vector, top_k))
            .send()
            .await
            .map_err(|e| self.request_failed(e))?;
        let response = self.check_status(response).await?;

        let parsed: QueryResponse =
            response.json().await.map_err(|e| RetrievalError::MalformedResponse {
                index: self.name.clone(),
                reason: e.to_string(),
            })?;

        let passages: Vec<Passage> = parsed
            .matches
            .into_iter()
            .filter_map(QueryMatch::into_passage)
            .collect();
        debug!(index = %self.name, passages = passages.len(), "Pinecone query complete");
        Ok(passages)
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    host: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl QueryMatch {
    /// Matches without any text in their metadata carry nothing to cite.
    fn into_passage(self) -> Option<Passage> {
        let text = |key: &str| {
            self.metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let content = text("text").or_else(|| text("page_content"))?;
        let title = text("title");
        let source = text("source")
            .or_else(|| title.clone())
            .or_else(|| text("url"))
            .unwrap_or_else(|| self.id.clone());

        let mut passage = Passage::new(content, source);
        passage.title = title;
        passage.score = self.score;
        Some(passage)
    }
}
