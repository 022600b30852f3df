//! Direct agent: one persona prompt, one model call.

use agrag_core::agent::{Agent, AgentDescriptor, OutcomeKind, Turn, TurnOutcome};
use agrag_core::error::{PipelineError, Stage};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::stage::{StageModel, StageSpan, conversation, emit_answer};

pub struct DirectAgent {
    descriptor: AgentDescriptor,
    model: StageModel,
    prompt: String,
}

impl DirectAgent {
    pub fn new(descriptor: AgentDescriptor, model: StageModel, prompt: impl Into<String>) -> Self {
        Self {
            descriptor,
            model,
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl Agent for DirectAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, turn: &mut Turn) -> Result<TurnOutcome, PipelineError> {
        turn.state.begin_turn();

        let span = StageSpan::start(&turn.events, Stage::Generation).await;
        let messages = conversation(self.prompt.clone(), &turn.history, &turn.utterance);
        let reply = match self.model.collect_stream(Stage::Generation, messages).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(agent = %self.descriptor.name, error = %e, "Generation failed");
                turn.state.fail();
                return Err(e);
            }
        };
        turn.record_usage(reply.usage.as_ref());
        span.finish(&turn.events, serde_json::json!({ "model": self.model.model() }))
            .await;

        let answer = reply.text.trim().to_string();
        turn.state.complete_direct(&answer)?;
        emit_answer(&turn.events, &answer).await;
        info!(agent = %self.descriptor.name, thread_id = %turn.thread_id, "Generated answer");

        Ok(TurnOutcome::new(
            &self.descriptor.name,
            answer,
            OutcomeKind::Generated,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, stage_model};
    use agrag_core::message::{Message, ThreadId};
    use agrag_core::session::TurnPhase;
    use std::sync::Arc;

    #[tokio::test]
    async fn answers_with_persona_and_history() {
        let provider = Arc::new(ScriptedProvider::new(vec!["  def suma(a, b):\n    return a + b\n"]));
        let agent = DirectAgent::new(
            AgentDescriptor::new("coder", "Escribe código"),
            stage_model(provider.clone()),
            "Responde solo con código Python.",
        );

        let mut turn = Turn::new(ThreadId::from("t"), "una función que sume")
            .with_history(vec![Message::user("hola"), Message::assistant("hola")]);
        let outcome = agent.execute(&mut turn).await.unwrap();

        assert_eq!(outcome.kind, OutcomeKind::Generated);
        assert_eq!(outcome.answer, "def suma(a, b):\n    return a + b");
        assert_eq!(turn.state.phase(), TurnPhase::Done);
        assert_eq!(turn.state.answer(), Some(outcome.answer.as_str()));

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].content, "Responde solo con código Python.");
        assert_eq!(request.messages.len(), 4);
        assert!(request.stream);
    }

    #[tokio::test]
    async fn failure_marks_turn_failed() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![Err(
            agrag_core::error::ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let agent = DirectAgent::new(
            AgentDescriptor::new("hello", "Saluda"),
            stage_model(provider),
            "Sé amable.",
        );
        let mut turn = Turn::new(ThreadId::from("t"), "hola");
        let err = agent.execute(&mut turn).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Generation));
        assert!(!err.is_retryable());
        assert_eq!(turn.state.phase(), TurnPhase::Failed);
    }
}
