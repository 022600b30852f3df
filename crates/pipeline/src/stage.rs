//! Calling a model from inside a stage.
//!
//! Every external call gets its own timeout and every failure is attributed
//! to the stage that made the call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agrag_core::error::{PipelineError, Stage};
use agrag_core::event::{EventSink, TurnEvent};
use agrag_core::message::Message;
use agrag_core::provider::{Provider, ProviderRequest, Usage};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A resolved model plus the sampling and timeout settings one stage uses.
#[derive(Clone)]
pub struct StageModel {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

/// Text produced by one model call.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub text: String,
    pub usage: Option<Usage>,
}

impl StageModel {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        let mut request =
            ProviderRequest::new(&self.model, messages).with_temperature(self.temperature);
        request.max_tokens = self.max_tokens;
        request
    }

    /// One non-streaming call.
    pub async fn complete(
        &self,
        stage: Stage,
        messages: Vec<Message>,
    ) -> Result<Reply, PipelineError> {
        debug!(%stage, model = %self.model, provider = self.provider.name(), "Model call");
        let call = self.provider.complete(self.request(messages));
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| PipelineError::timeout(stage, self.timeout))?
            .map_err(|e| PipelineError::provider(stage, e))?;
        Ok(Reply {
            text: response.message.content,
            usage: response.usage,
        })
    }

    /// A streaming call collected into one buffer. The timeout covers the
    /// whole stream, and an interrupted stream fails the stage.
    pub async fn collect_stream(
        &self,
        stage: Stage,
        messages: Vec<Message>,
    ) -> Result<Reply, PipelineError> {
        debug!(%stage, model = %self.model, provider = self.provider.name(), "Streaming model call");
        let mut request = self.request(messages);
        request.stream = true;

        let collect = async {
            let mut rx = self.provider.stream(request).await?;
            let mut reply = Reply::default();
            while let Some(chunk) = rx.recv().await {
                let chunk = chunk?;
                if let Some(content) = chunk.content {
                    reply.text.push_str(&content);
                }
                if chunk.usage.is_some() {
                    reply.usage = chunk.usage;
                }
                if chunk.done {
                    break;
                }
            }
            Ok(reply)
        };

        tokio::time::timeout(self.timeout, collect)
            .await
            .map_err(|_| PipelineError::timeout(stage, self.timeout))?
            .map_err(|e| PipelineError::provider(stage, e))
    }
}

/// Wall-clock span of one stage, reported as `stage_started` /
/// `stage_completed` events.
pub(crate) struct StageSpan {
    stage: Stage,
    started: Instant,
}

impl StageSpan {
    pub(crate) async fn start(events: &EventSink, stage: Stage) -> Self {
        events.emit(TurnEvent::StageStarted { stage }).await;
        Self {
            stage,
            started: Instant::now(),
        }
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub(crate) async fn finish(self, events: &EventSink, detail: serde_json::Value) {
        let elapsed_ms = self.elapsed_ms();
        events
            .emit(TurnEvent::StageCompleted {
                stage: self.stage,
                elapsed_ms,
                detail,
            })
            .await;
    }
}

/// Send a finished answer to the client as `text_delta` events, one line
/// at a time. Only called once the answer is final, so a failed stage never
/// leaks partial text.
pub(crate) async fn emit_answer(events: &EventSink, answer: &str) {
    for piece in answer.split_inclusive('\n') {
        events
            .emit(TurnEvent::TextDelta {
                delta: piece.to_string(),
            })
            .await;
    }
}

/// The system prompt, the recent history, then the utterance.
pub(crate) fn conversation(system: String, history: &[Message], utterance: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(
        history
            .iter()
            .filter(|m| m.role != agrag_core::message::Role::System)
            .cloned(),
    );
    messages.push(Message::user(utterance));
    messages
}
