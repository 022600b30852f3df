//! The RAG pipeline: triage → query generation → multi-query retrieval →
//! synthesis, driven as an explicit state machine over the session state.
//!
//! # Flow
//!
//! 1. Triage the utterance (skipped when disabled; recorded as SPECIFIC)
//! 2. GENERAL: the triage reply is the answer, nothing is retrieved
//! 3. SPECIFIC: generate exactly N queries
//! 4. Search every query concurrently and wait for all of them
//! 5. Synthesize a cited answer and replay it to the client
//!
//! A failure at any stage marks the turn `Failed` and is returned with the
//! stage attached; the answer slot is never filled with partial text.

use agrag_core::agent::{Agent, AgentDescriptor, OutcomeKind, Turn, TurnOutcome};
use agrag_core::error::{PipelineError, Stage};
use agrag_core::session::{TriageLabel, TriageVerdict};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::query_gen::QueryGenerator;
use crate::retriever::MultiQueryRetriever;
use crate::stage::{StageSpan, emit_answer};
use crate::synthesizer::Synthesizer;
use crate::triage::TriageClassifier;

pub struct RagPipeline {
    descriptor: AgentDescriptor,
    /// `None` treats every turn as SPECIFIC.
    triage: Option<TriageClassifier>,
    generator: QueryGenerator,
    retriever: MultiQueryRetriever,
    synthesizer: Synthesizer,
}

impl RagPipeline {
    pub fn new(
        descriptor: AgentDescriptor,
        triage: Option<TriageClassifier>,
        generator: QueryGenerator,
        retriever: MultiQueryRetriever,
        synthesizer: Synthesizer,
    ) -> Self {
        Self {
            descriptor,
            triage,
            generator,
            retriever,
            synthesizer,
        }
    }

    async fn run(&self, turn: &mut Turn) -> Result<TurnOutcome, PipelineError> {
        // ── Triage ──
        let verdict = match &self.triage {
            Some(triage) => {
                let span = StageSpan::start(&turn.events, Stage::Triage).await;
                let (verdict, reply) = triage.classify(&turn.utterance, &turn.history).await?;
                turn.record_usage(reply.usage.as_ref());
                span.finish(&turn.events, serde_json::json!({ "label": verdict.label }))
                    .await;
                verdict
            }
            None => TriageVerdict::specific(),
        };
        let label = verdict.label;
        turn.state.record_triage(verdict)?;

        if label == TriageLabel::General {
            turn.state.complete()?;
            let answer = turn.state.answer().unwrap_or_default().to_string();
            emit_answer(&turn.events, &answer).await;
            info!(agent = %self.descriptor.name, thread_id = %turn.thread_id, "Answered directly");
            return Ok(TurnOutcome::new(
                &self.descriptor.name,
                answer,
                OutcomeKind::General,
            ));
        }

        // ── Query generation ──
        let span = StageSpan::start(&turn.events, Stage::QueryGeneration).await;
        let generated = self.generator.generate(&turn.utterance).await?;
        turn.record_usage(generated.reply.usage.as_ref());
        span.finish(
            &turn.events,
            serde_json::json!({
                "queries": generated.queries.as_slice(),
                "padded": generated.padded,
            }),
        )
        .await;
        let queries = generated.queries;
        turn.state.record_queries(queries.clone())?;

        // ── Retrieval ──
        let span = StageSpan::start(&turn.events, Stage::Retrieval).await;
        let retrieval = self.retriever.retrieve(&queries).await;
        if retrieval.all_failed() {
            warn!(
                agent = %self.descriptor.name,
                index = self.retriever.index_name(),
                queries = queries.len(),
                "Every search failed"
            );
        }
        let per_query: serde_json::Map<String, serde_json::Value> = retrieval
            .groups
            .iter()
            .map(|g| (g.query.clone(), serde_json::json!(g.passages.len())))
            .collect();
        span.finish(
            &turn.events,
            serde_json::json!({
                "passages": retrieval.passage_count(),
                "failed": retrieval.failed_queries(),
                "byQuery": per_query,
            }),
        )
        .await;
        turn.state.record_retrieval(retrieval.clone())?;

        // ── Synthesis ──
        let span = StageSpan::start(&turn.events, Stage::Synthesis).await;
        let synthesis = self.synthesizer.synthesize(&turn.utterance, &retrieval).await?;
        turn.record_usage(synthesis.usage.as_ref());
        span.finish(
            &turn.events,
            serde_json::json!({
                "sources": synthesis.sources,
                "insufficient": synthesis.insufficient,
            }),
        )
        .await;
        turn.state.record_synthesis(&synthesis.answer)?;
        turn.state.complete()?;

        emit_answer(&turn.events, &synthesis.answer).await;
        info!(
            agent = %self.descriptor.name,
            thread_id = %turn.thread_id,
            queries = queries.len(),
            passages = retrieval.passage_count(),
            sources = synthesis.sources.len(),
            "Synthesized answer"
        );

        let kind = if synthesis.insufficient {
            OutcomeKind::Insufficient
        } else {
            OutcomeKind::Synthesized
        };
        Ok(TurnOutcome::new(&self.descriptor.name, synthesis.answer, kind)
            .with_sources(synthesis.sources))
    }
}

#[async_trait]
impl Agent for RagPipeline {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, turn: &mut Turn) -> Result<TurnOutcome, PipelineError> {
        turn.state.begin_turn();
        let result = self.run(turn).await;
        if let Err(e) = &result {
            warn!(agent = %self.descriptor.name, error = %e, "Turn failed");
            turn.state.fail();
        }
        result
    }
}
