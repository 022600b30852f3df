//! Shared test helpers for pipeline tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agrag_core::error::{ProviderError, RetrievalError};
use agrag_core::event::TurnEvent;
use agrag_core::message::Message;
use agrag_core::passage::Passage;
use agrag_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use agrag_core::search::SearchIndex;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::stage::StageModel;

/// A mock provider that returns a sequence of scripted replies.
///
/// Each call to `complete` returns the next reply in the queue.
/// Panics if more calls are made than replies provided.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<&str>) -> Self {
        Self::with_results(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn with_results(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let reply = {
            let mut requests = self.requests.lock().unwrap();
            let mut replies = self.replies.lock().unwrap();
            let reply = replies.pop_front().unwrap_or_else(|| {
                panic!(
                    "ScriptedProvider: no more replies (call #{})",
                    requests.len() + 1
                )
            });
            requests.push(request);
            reply
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        reply.map(|text| make_text_response(&text))
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn stage_model(provider: Arc<ScriptedProvider>) -> StageModel {
    StageModel::new(provider, "mock-model")
}

/// A search index that counts calls and answers from a script.
///
/// Queries listed in `failing` return an error; queries with an entry in
/// `by_query` get those passages; everything else gets `default`.
#[derive(Default)]
pub struct CountingIndex {
    default: Vec<Passage>,
    by_query: HashMap<String, Vec<Passage>>,
    failing: HashSet<String>,
    delay: HashMap<String, Duration>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl CountingIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn returning(passages: Vec<Passage>) -> Self {
        Self {
            default: passages,
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: &str, passages: Vec<Passage>) -> Self {
        self.by_query.insert(query.to_string(), passages);
        self
    }

    pub fn failing_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn slow_on(mut self, query: &str, delay: Duration) -> Self {
        self.delay.insert(query.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchIndex for CountingIndex {
    fn name(&self) -> &str {
        "counting_mock"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay.get(query) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(query) {
            return Err(RetrievalError::RequestFailed {
                index: "counting_mock".into(),
                reason: "scripted failure".into(),
            });
        }
        let mut passages = self
            .by_query
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        passages.truncate(top_k);
        Ok(passages)
    }
}

/// Collect every event until the sending side is gone.
pub async fn drain(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
