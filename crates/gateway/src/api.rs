//! HTTP API.
//!
//! Endpoints:
//!
//! - `POST   /{agent-path}`: Run one turn, SSE stream of turn events
//! - `GET    /agents`: List agents and their endpoints
//! - `GET    /threads`: Threads of the caller (`?agent=` filter)
//! - `DELETE /threads/{id}`: Delete a thread
//! - `GET    /threads/{id}/messages`: Message history of a thread
//! - `GET    /threads/{id}/state`: Session state of a thread
//! - `PATCH  /threads/{id}/state`: Merge values into the session state
//!
//! The caller is identified by the `X-User-Id` header (`guest` if absent).

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        Json,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use agrag_core::agent::{Agent, Turn};
use agrag_core::event::{EventSink, TurnEvent};
use agrag_core::message::{Message, Role, ThreadId};
use agrag_pipeline::AgentRegistry;

use crate::threads::{OpenError, ThreadStore, ThreadSummary};

const USER_HEADER: &str = "x-user-id";
const ANONYMOUS_USER: &str = "guest";
const EVENT_BUFFER: usize = 64;

/// Shared application state for the API.
pub struct ApiState {
    pub registry: AgentRegistry,
    pub threads: ThreadStore,
    /// Earlier messages handed to agents.
    pub history_window: usize,
}

pub type SharedApiState = Arc<ApiState>;

/// Build the API router.
pub fn api_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/agents", get(list_agents_handler))
        .route("/threads", get(list_threads_handler))
        .route(
            "/threads/{id}",
            axum::routing::delete(delete_thread_handler),
        )
        .route("/threads/{id}/messages", get(thread_messages_handler))
        .route(
            "/threads/{id}/state",
            get(get_state_handler).patch(patch_state_handler),
        )
        .route("/{agent}", post(run_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    messages: Vec<InputMessage>,
    /// Client values merged into the session state before the turn.
    #[serde(default)]
    state: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct InputMessage {
    role: Role,
    #[serde(default)]
    content: String,
}

impl RunRequest {
    /// `message`, or else the last user entry of `messages`.
    fn utterance(&self) -> Option<String> {
        self.message.clone().or_else(|| {
            self.messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
        })
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[derive(Serialize, Deserialize)]
struct AgentListResponse {
    agents: Vec<AgentDto>,
}

#[derive(Serialize, Deserialize)]
struct AgentDto {
    name: String,
    description: String,
    endpoint: String,
    keywords: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ThreadListResponse {
    threads: Vec<ThreadSummary>,
}

#[derive(Deserialize)]
struct ThreadFilter {
    agent: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesResponse {
    thread_id: String,
    messages: Vec<Message>,
}

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string()
}

// ── Turns ─────────────────────────────────────────────────────────────────

/// `POST /{agent}`: run one turn and stream its events.
async fn run_handler(
    State(state): State<SharedApiState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<RunRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let agent = state
        .registry
        .by_path(&path)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no agent at /{path}")))?;
    let utterance = payload
        .utterance()
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "message is required"))?;

    let user = user_id(&headers);
    let thread_id = payload
        .thread_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| ThreadId::new().0);
    let run_id = payload
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let lock = state
        .threads
        .open(&thread_id, agent.name(), &user, || {
            state.registry.initial_state(agent.name())
        })
        .await
        .map_err(|e| match e {
            OpenError::NotVisible => {
                api_error(StatusCode::NOT_FOUND, format!("thread {thread_id} not found"))
            }
            OpenError::OtherAgent(owner) => api_error(
                StatusCode::CONFLICT,
                format!("thread {thread_id} belongs to agent {owner}"),
            ),
            OpenError::AtCapacity => api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "every thread is busy, retry shortly",
            ),
        })?;

    info!(
        agent = %agent.name(),
        thread_id = %thread_id,
        run_id = %run_id,
        user = %user,
        "Turn requested"
    );

    let (events, rx) = EventSink::channel(EVENT_BUFFER);
    let run = TurnRun {
        thread_id,
        run_id,
        utterance,
        client_state: payload.state,
    };
    tokio::spawn(drive(state, agent, lock, run, events));

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

struct TurnRun {
    thread_id: String,
    run_id: String,
    utterance: String,
    client_state: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Run the turn until it ends or the client goes away. Dropping the turn
/// future cancels every outstanding model and index call.
async fn drive(
    state: SharedApiState,
    agent: Arc<dyn Agent>,
    lock: Arc<Mutex<()>>,
    run: TurnRun,
    events: EventSink,
) {
    tokio::select! {
        _ = run_turn(&state, agent, lock, &run, &events) => {}
        _ = events.closed() => {
            info!(thread_id = %run.thread_id, run_id = %run.run_id, "Client disconnected, turn cancelled");
        }
    }
}

async fn run_turn(
    state: &ApiState,
    agent: Arc<dyn Agent>,
    lock: Arc<Mutex<()>>,
    run: &TurnRun,
    events: &EventSink,
) {
    let _turn_guard = lock.lock().await;

    let Some((history, mut session)) = state.threads.load(&run.thread_id, state.history_window).await
    else {
        events
            .emit(TurnEvent::RunError {
                stage: None,
                message: format!("thread {} was removed", run.thread_id),
                retryable: false,
            })
            .await;
        return;
    };
    if let Some(patch) = &run.client_state {
        session.merge_values(patch);
    }

    events
        .emit(TurnEvent::RunStarted {
            thread_id: run.thread_id.clone(),
            run_id: run.run_id.clone(),
            agent: agent.name().to_string(),
        })
        .await;

    let mut turn = Turn::new(ThreadId::from(&run.thread_id), &run.utterance)
        .with_run_id(&run.run_id)
        .with_history(history)
        .with_state(session)
        .with_events(events.clone());

    match agent.execute(&mut turn).await {
        Ok(outcome) => {
            let mut reply = Message::assistant(&outcome.answer);
            reply
                .metadata
                .insert("agent".into(), serde_json::Value::String(outcome.agent.clone()));
            if !outcome.sources.is_empty() {
                reply
                    .metadata
                    .insert("sources".into(), serde_json::json!(outcome.sources));
            }

            let committed = state
                .threads
                .commit(
                    &run.thread_id,
                    [Message::user(&run.utterance), reply],
                    turn.state.clone(),
                )
                .await;
            if !committed {
                warn!(thread_id = %run.thread_id, "Thread removed during turn, result not stored");
            }

            let snapshot = serde_json::to_value(&turn.state).unwrap_or_default();
            events.emit(TurnEvent::StateSnapshot { snapshot }).await;
            events
                .emit(TurnEvent::RunFinished {
                    thread_id: run.thread_id.clone(),
                    run_id: run.run_id.clone(),
                    usage: Some(turn.usage.clone()),
                })
                .await;
            info!(
                agent = %outcome.agent,
                thread_id = %run.thread_id,
                kind = ?outcome.kind,
                tokens = turn.usage.total_tokens,
                "Turn finished"
            );
        }
        Err(e) => {
            error!(
                agent = %agent.name(),
                thread_id = %run.thread_id,
                stage = ?e.stage(),
                error = %e,
                "Turn failed"
            );
            events.emit(TurnEvent::from_error(&e)).await;
        }
    }
}

// ── Agents and threads ────────────────────────────────────────────────────

async fn list_agents_handler(State(state): State<SharedApiState>) -> Json<AgentListResponse> {
    let agents = state
        .registry
        .descriptors()
        .into_iter()
        .map(|d| AgentDto {
            endpoint: format!("/{}", d.path),
            name: d.name,
            description: d.description,
            keywords: d.keywords,
        })
        .collect();
    Json(AgentListResponse { agents })
}

async fn list_threads_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Query(filter): Query<ThreadFilter>,
) -> Json<ThreadListResponse> {
    let threads = state
        .threads
        .list(&user_id(&headers), filter.agent.as_deref())
        .await;
    Json(ThreadListResponse { threads })
}

async fn delete_thread_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> StatusCode {
    if state.threads.remove(&id, &user_id(&headers)).await {
        info!(thread_id = %id, "Thread deleted");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn thread_messages_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, StatusCode> {
    let messages = state
        .threads
        .messages(&id, &user_id(&headers))
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(MessagesResponse {
        thread_id: id,
        messages,
    }))
}

async fn get_state_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let session = state
        .threads
        .state(&id, &user_id(&headers))
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    serde_json::to_value(&session)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn patch_state_handler(
    State(state): State<SharedApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let session = state
        .threads
        .patch_state(&id, &user_id(&headers), &patch)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    serde_json::to_value(&session)
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
