//! End-to-end integration tests for agrag.
//!
//! These tests drive whole turns: triage through synthesis on the RAG
//! pipeline, agents built from a TOML config, coordinator routing, and the
//! gateway's SSE stream.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agrag_config::AppConfig;
use agrag_core::agent::{Agent, AgentDescriptor, OutcomeKind, Turn};
use agrag_core::error::{ProviderError, RetrievalError};
use agrag_core::message::{Message, ThreadId};
use agrag_core::passage::Passage;
use agrag_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use agrag_core::search::SearchIndex;
use agrag_core::session::TurnPhase;
use agrag_pipeline::{
    AgentRegistry, MultiQueryRetriever, QueryGenerator, RagPipeline, StageModel, Synthesizer,
    TriageClassifier,
};
use agrag_providers::ProviderRouter;

// ── Mocks ────────────────────────────────────────────────────────────────

/// A mock provider that returns scripted replies in sequence.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted at call #{}", n + 1));
        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock".into(),
        })
    }
}

/// A help-desk index: every query gets the same passages, except queries
/// listed as failing.
struct HelpDeskIndex {
    passages: Vec<Passage>,
    failing: HashSet<String>,
    queries: Mutex<Vec<String>>,
}

impl HelpDeskIndex {
    fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            failing: HashSet::new(),
            queries: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl SearchIndex for HelpDeskIndex {
    fn name(&self) -> &str {
        "help_desk"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.failing.contains(query) {
            return Err(RetrievalError::RequestFailed {
                index: "help_desk".into(),
                reason: "503".into(),
            });
        }
        Ok(self.passages.iter().take(top_k).cloned().collect())
    }
}

fn escrow_passages() -> Vec<Passage> {
    vec![
        Passage::new(
            "El cliente deposita el pago antes de que empiece el trabajo; Workana lo retiene.",
            "help.workana.com/deposito-en-garantia",
        )
        .with_score(0.91),
        Passage::new(
            "Los fondos se liberan al freelancer cuando el cliente aprueba la entrega.",
            "help.workana.com/liberar-pagos",
        )
        .with_score(0.87),
    ]
}

fn workana_pipeline(provider: Arc<ScriptedProvider>, index: Arc<HelpDeskIndex>) -> RagPipeline {
    let model = || StageModel::new(provider.clone(), "mock").with_temperature(0.0);
    RagPipeline::new(
        AgentDescriptor::new("workana_rag", "Help Desk de Workana")
            .with_path("workana")
            .with_keywords(["workana", "depósito", "garantía"]),
        Some(TriageClassifier::new(model(), "Asistente del Help Desk de Workana")),
        QueryGenerator::new(model(), 3),
        MultiQueryRetriever::new(index, 5, Duration::from_secs(5)),
        Synthesizer::new(model(), "Asistente del Help Desk de Workana"),
    )
}

// ── E2E: RAG pipeline ────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_greeting_is_answered_without_retrieval() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "GENERAL: ¡Hola! Soy el asistente del Help Desk de Workana. ¿En qué puedo ayudarte?",
    ]));
    let index = Arc::new(HelpDeskIndex::new(escrow_passages()));
    let agent = workana_pipeline(provider.clone(), index.clone());

    let mut turn = Turn::new(ThreadId::new(), "hola");
    let outcome = agent.execute(&mut turn).await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::General);
    assert!(outcome.answer.starts_with("¡Hola!"));
    assert!(outcome.sources.is_empty());
    assert_eq!(index.calls(), 0);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn e2e_escrow_question_generates_three_queries_and_cites_sources() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "SPECIFIC",
        r#"```json
["depósito en garantía Workana", "cómo se liberan los pagos", "protección de pagos cliente"]
```"#,
        "El cliente deposita el pago por adelantado y Workana lo retiene [1]. \
         Cuando apruebas la entrega, los fondos se liberan al freelancer [2].\n\n\
         Fuentes:\n- inventada.com",
    ]));
    let index = Arc::new(HelpDeskIndex::new(escrow_passages()));
    let agent = workana_pipeline(provider.clone(), index.clone());

    let mut turn = Turn::new(
        ThreadId::new(),
        "¿Cómo funciona el depósito en garantía de Workana?",
    );
    let outcome = agent.execute(&mut turn).await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Synthesized);
    assert_eq!(turn.state.queries().unwrap().len(), 3);
    assert_eq!(index.calls(), 3);
    assert_eq!(provider.calls(), 3);

    // The sources come from the retrieved passages, not from the model.
    assert!(outcome.answer.contains("Fuentes:"));
    assert!(outcome.answer.contains("- help.workana.com/deposito-en-garantia"));
    assert!(!outcome.answer.contains("inventada.com"));
    assert_eq!(
        outcome.sources,
        vec![
            "help.workana.com/deposito-en-garantia",
            "help.workana.com/liberar-pagos"
        ]
    );
    assert_eq!(turn.state.phase(), TurnPhase::Done);
}

#[tokio::test]
async fn e2e_out_of_domain_question_declines() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "SPECIFIC",
        r#"["receta pizza napolitana", "masa de pizza", "horno de leña"]"#,
    ]));
    let index = Arc::new(HelpDeskIndex::new(Vec::new()));
    let agent = workana_pipeline(provider.clone(), index.clone());

    let mut turn = Turn::new(ThreadId::new(), "¿Cómo hago una pizza napolitana?");
    let outcome = agent.execute(&mut turn).await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Insufficient);
    assert!(outcome.answer.contains("No tengo esa información"));
    assert!(!outcome.answer.contains("Fuentes:"));
    assert!(outcome.sources.is_empty());
    assert_eq!(index.calls(), 3);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn e2e_partial_retrieval_failure_still_answers() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "SPECIFIC",
        r#"["depósito en garantía", "liberar pagos", "disputas"]"#,
        "Workana retiene el pago hasta que apruebas la entrega [1].",
    ]));
    let index = Arc::new(HelpDeskIndex::new(escrow_passages()).failing_on("disputas"));
    let agent = workana_pipeline(provider.clone(), index.clone());

    let mut turn = Turn::new(ThreadId::new(), "¿Cuándo se libera el depósito?");
    let outcome = agent.execute(&mut turn).await.unwrap();

    assert_eq!(outcome.kind, OutcomeKind::Synthesized);
    assert!(outcome.answer.contains("1 de 3"));
    assert_eq!(turn.state.retrieval().unwrap().failed_queries(), 1);
    assert_eq!(index.calls(), 3);
}

// ── E2E: Agents built from configuration ────────────────────────────────

const CONFIG: &str = r#"
default_provider = "mock"
default_model = "mock/mock-model"

[[agents]]
name = "faq"
description = "Preguntas frecuentes sobre pagos"
keywords = ["tarifa", "pagos"]

[agents.pipeline]
type = "rag"
query_count = 2
top_k = 3
persona = "Asistente de pagos"

[agents.pipeline.source]
type = "memory"

[[agents.pipeline.source.documents]]
source = "faq/tarifas.md"
content = "La tarifa de servicio sobre los pagos es del 10% de cada proyecto."

[[agents]]
name = "hello"
description = "Saluda"
path = "hello_agent"

[agents.pipeline]
type = "direct"
prompt = "Saluda con amabilidad y pregunta el nombre."

[[agents]]
name = "coordinator"
description = "Enruta cada mensaje al agente adecuado"

[agents.pipeline]
type = "coordinator"
default_agent = "hello"
"#;

fn registry_with(provider: Arc<ScriptedProvider>) -> AgentRegistry {
    let config: AppConfig = toml::from_str(CONFIG).unwrap();
    config.validate().unwrap();
    let mut providers = ProviderRouter::new("mock");
    providers.register("mock", provider);
    AgentRegistry::from_config(&config, &providers).unwrap()
}

#[tokio::test]
async fn e2e_coordinator_routes_to_configured_rag_agent() {
    let provider = Arc::new(ScriptedProvider::new(&[
        "SPECIFIC",
        r#"["tarifa de servicio", "comisión sobre pagos"]"#,
        "La tarifa de servicio es del 10% de cada proyecto [1].",
    ]));
    let registry = registry_with(provider.clone());
    let coordinator = registry.get("coordinator").unwrap();

    let mut turn = Turn::new(ThreadId::new(), "¿Cuál es la tarifa de los pagos?")
        .with_state(registry.initial_state("coordinator"));
    let outcome = coordinator.execute(&mut turn).await.unwrap();

    assert_eq!(outcome.agent, "faq");
    assert_eq!(outcome.kind, OutcomeKind::Synthesized);
    assert_eq!(outcome.sources, vec!["faq/tarifas.md"]);
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn e2e_coordinator_falls_back_to_default_agent() {
    let provider = Arc::new(ScriptedProvider::new(&["¡Hola! ¿Cómo te llamas?"]));
    let registry = registry_with(provider.clone());

    let mut turn = Turn::new(ThreadId::new(), "buenas tardes");
    let outcome = registry
        .get("coordinator")
        .unwrap()
        .execute(&mut turn)
        .await
        .unwrap();

    assert_eq!(outcome.agent, "hello");
    assert_eq!(outcome.kind, OutcomeKind::Generated);
    assert_eq!(provider.calls(), 1);
}

// ── E2E: Gateway ─────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_gateway_streams_a_rag_turn() {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let provider = Arc::new(ScriptedProvider::new(&[
        "SPECIFIC",
        r#"["depósito en garantía", "liberar pagos", "protección"]"#,
        "Workana retiene el pago hasta que apruebas la entrega [1].",
    ]));
    let index = Arc::new(HelpDeskIndex::new(escrow_passages()));
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(workana_pipeline(provider, index)));

    let state = Arc::new(agrag_gateway::ApiState {
        registry,
        threads: agrag_gateway::ThreadStore::new(10),
        history_window: 20,
    });
    let config = agrag_config::GatewayConfig::default();

    let request = Request::builder()
        .method("POST")
        .uri("/workana")
        .header("content-type", "application/json")
        .header("x-user-id", "ana")
        .body(Body::from(
            serde_json::json!({"threadId": "t-escrow", "message": "¿Cómo funciona el depósito?"})
                .to_string(),
        ))
        .unwrap();
    let response = agrag_gateway::build_router(state.clone(), &config)
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8_lossy(&body);

    let events: Vec<&str> = body
        .lines()
        .filter_map(|l| l.strip_prefix("event:"))
        .map(str::trim)
        .collect();
    assert_eq!(events.first(), Some(&"run_started"));
    assert_eq!(events.last(), Some(&"run_finished"));
    assert_eq!(events.iter().filter(|e| **e == "stage_completed").count(), 4);
    assert!(events.contains(&"text_delta"));
    assert!(!events.contains(&"run_error"));

    let mut stages: HashMap<String, usize> = HashMap::new();
    for line in body.lines().filter_map(|l| l.strip_prefix("data:")) {
        let data: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        if data["type"] == "stage_completed" {
            *stages.entry(data["stage"].as_str().unwrap().to_string()).or_default() += 1;
        }
    }
    assert_eq!(stages.get("retrieval"), Some(&1));

    let messages = state.threads.messages("t-escrow", "ana").await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].content.contains("Fuentes:"));
    assert_eq!(messages[1].metadata["agent"], "workana_rag");
}

// ── E2E: Configuration ───────────────────────────────────────────────────

#[test]
fn e2e_default_config_file_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, AppConfig::default_toml().unwrap()).unwrap();

    let config = AppConfig::load_from(&path).unwrap();
    config.validate().unwrap();

    let defaults = AppConfig::default();
    assert_eq!(config.agents.len(), defaults.agents.len());
    assert_eq!(config.gateway.port, defaults.gateway.port);
    assert!(config.agent("coordinator").is_some());
}
