//! Sequential prompt chain.
//!
//! Each step renders its template against the utterance (`{input}`) and the
//! session values (`{key}`), calls its model, and writes the reply under its
//! output key. The last step's reply is the answer.

use agrag_core::agent::{Agent, AgentDescriptor, OutcomeKind, Turn, TurnOutcome};
use agrag_core::error::{PipelineError, Stage};
use agrag_core::message::Message;
use agrag_core::session::SessionState;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::stage::{StageModel, StageSpan, emit_answer};

pub struct ChainStep {
    pub name: String,
    pub template: String,
    pub output_key: String,
    pub model: StageModel,
}

pub struct ChainAgent {
    descriptor: AgentDescriptor,
    steps: Vec<ChainStep>,
}

impl ChainAgent {
    pub fn new(descriptor: AgentDescriptor, steps: Vec<ChainStep>) -> Self {
        Self { descriptor, steps }
    }

    async fn run(&self, turn: &mut Turn) -> Result<String, PipelineError> {
        let mut last = String::new();
        for step in &self.steps {
            let prompt = render(&step.template, &turn.utterance, &turn.state);
            let span = StageSpan::start(&turn.events, Stage::Generation).await;
            let reply = step
                .model
                .complete(Stage::Generation, vec![Message::system(prompt), Message::user(&turn.utterance)])
                .await?;
            turn.record_usage(reply.usage.as_ref());

            let output = reply.text.trim().to_string();
            turn.state
                .set_value(&step.output_key, serde_json::Value::String(output.clone()));
            span.finish(
                &turn.events,
                serde_json::json!({ "step": step.name, "outputKey": step.output_key }),
            )
            .await;
            debug!(step = %step.name, key = %step.output_key, "Chain step complete");
            last = output;
        }
        Ok(last)
    }
}

#[async_trait]
impl Agent for ChainAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, turn: &mut Turn) -> Result<TurnOutcome, PipelineError> {
        turn.state.begin_turn();
        let answer = match self.run(turn).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(agent = %self.descriptor.name, error = %e, "Chain failed");
                turn.state.fail();
                return Err(e);
            }
        };
        turn.state.complete_direct(&answer)?;
        emit_answer(&turn.events, &answer).await;
        info!(agent = %self.descriptor.name, steps = self.steps.len(), "Chain complete");
        Ok(TurnOutcome::new(
            &self.descriptor.name,
            answer,
            OutcomeKind::Generated,
        ))
    }
}

/// Replace `{input}` with the utterance and `{key}` with the session value
/// under `key`. Unknown keys render as empty text; braces around anything
/// that is not an identifier are left alone.
pub fn render(template: &str, utterance: &str, state: &SessionState) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_identifier(&after[..close]) => {
                let key = &after[..close];
                if key == "input" {
                    out.push_str(utterance);
                } else {
                    out.push_str(&state.value_text(key));
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}
