//! HTTP gateway for agrag.
//!
//! Mounts every configured agent on its own path as a Server-Sent Events
//! endpoint, plus thread, history and state endpoints and a health check.
//!
//! Built on Axum.

pub mod api;
pub mod threads;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{Router, extract::State, response::Json, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use agrag_config::{AppConfig, GatewayConfig};
use agrag_pipeline::AgentRegistry;

pub use api::{ApiState, SharedApiState, api_router};
pub use threads::{ThreadStore, ThreadSummary};

/// Build the full router: API, health, CORS, body limit and request tracing.
pub fn build_router(state: SharedApiState, config: &GatewayConfig) -> Router {
    let health = Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone());

    health
        .merge(api_router(state))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-user-id"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let providers = agrag_providers::build_from_config(&config);
    let registry = AgentRegistry::from_config(&config, &providers)?;
    for agent in registry.descriptors() {
        info!(agent = %agent.name, endpoint = %format!("/{}", agent.path), "Mounted agent");
    }

    let state = Arc::new(ApiState {
        registry,
        threads: ThreadStore::new(config.gateway.max_threads),
        history_window: config.gateway.history_window,
    });
    let app = build_router(state, &config.gateway);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    agents: usize,
}

async fn health_handler(State(state): State<SharedApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        agents: state.registry.len(),
    })
}
