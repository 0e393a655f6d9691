//! HTTP and WebSocket gateway for kbchat.
//!
//! Routes:
//! - `GET  /health`            — liveness plus environment name
//! - `GET  /api/status`        — active backend and live session count
//! - `GET  /api/knowledge`     — list knowledge (optional `?category=`)
//! - `POST /api/knowledge`     — add knowledge and refresh every live session
//! - `GET  /ws/{client_id}`    — per-client chat channel
//!
//! Built on Axum.

pub mod knowledge_api;
pub mod ws;

use axum::extract::DefaultBodyLimit;
use axum::{Router, extract::State, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use kbchat_config::AppConfig;
use kbchat_knowledge::{JsonFileStore, KnowledgeManager};
use kbchat_providers::BackendRouter;
use kbchat_session::{SessionConfig, SessionStore};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub sessions: Arc<SessionStore>,
    pub production: bool,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(sessions: Arc<SessionStore>, production: bool) -> SharedState {
        Arc::new(Self { sessions, production })
    }
}

/// Build the Axum router with all gateway routes and layers.
///
/// Layers: permissive CORS, 1 MB request body limit, HTTP trace logging.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route(
            "/api/knowledge",
            get(knowledge_api::list_knowledge).post(knowledge_api::add_knowledge),
        )
        .route("/ws/{client_id}", get(ws::ws_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Assemble knowledge, backend router and session store from `config`.
///
/// Backend configuration errors are fatal here.
pub async fn build_state(config: &AppConfig) -> kbchat_core::Result<SharedState> {
    let store = Arc::new(JsonFileStore::new(&config.knowledge.path));
    let knowledge = Arc::new(KnowledgeManager::open(store).await?);
    let router = Arc::new(BackendRouter::build(config)?);
    let sessions = Arc::new(SessionStore::new(
        SessionConfig::from_chat(&config.chat),
        knowledge,
        router,
    ));
    Ok(GatewayState::new(sessions, config.production))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = build_state(&config).await?;

    info!(
        backend = %state.sessions.router().kind(),
        model = %state.sessions.router().name(),
        environment = environment_name(state.production),
        "Gateway configured"
    );

    // Warm the backend so the first client does not pay for the load alone.
    let router = state.sessions.router().clone();
    tokio::spawn(async move {
        let probe = router.load().await;
        if !probe.ready {
            error!(message = %probe.message, "Initial backend load failed");
        }
    });

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn environment_name(production: bool) -> &'static str {
    if production { "production" } else { "local" }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    environment: &'static str,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        environment: environment_name(state.production),
    })
}

#[derive(Serialize)]
struct StatusResponse {
    backend: String,
    model: String,
    ready: bool,
    sessions: usize,
    version: &'static str,
}

async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    let router = state.sessions.router();
    Json(StatusResponse {
        backend: router.kind().to_string(),
        model: router.name().to_string(),
        ready: router.is_ready(),
        sessions: state.sessions.len().await,
        version: env!("CARGO_PKG_VERSION"),
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::test_state;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state().await);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"status": "healthy", "environment": "local"}));
    }

    #[tokio::test]
    async fn status_reports_backend() {
        let state = test_state().await;
        state.sessions.get_or_create("c1").await;
        let app = build_router(state);

        let req = Request::builder().uri("/api/status").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["backend"], "local_daemon");
        assert_eq!(json["model"], "mock-model");
        assert_eq!(json["ready"], false);
        assert_eq!(json["sessions"], 1);
    }

    #[tokio::test]
    async fn ws_route_exists() {
        let app = build_router(test_state().await);
        let req = Request::builder().uri("/ws/client-1").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        // Without upgrade headers axum rejects the request, but the route exists.
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn build_state_rejects_missing_hosted_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.knowledge.path = dir.path().join("knowledge.json");
        config.backend = kbchat_config::BackendConfig::HostedApi(Default::default());
        assert!(matches!(
            build_state(&config).await,
            Err(kbchat_core::Error::Backend(kbchat_core::BackendError::Config(_)))
        ));
    }
}
