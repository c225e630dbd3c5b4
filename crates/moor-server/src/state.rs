//! Shared application state, router construction, and serving.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use moor_engine::SyncEngine;

use crate::connection::ConnectionManager;
use crate::http;
use crate::readiness::ReadinessTracker;
use crate::ws;

/// State shared by all HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    /// The protocol engine.
    pub engine: Arc<SyncEngine>,
    /// Live agent connections; also the engine's instruction router.
    pub connections: Arc<ConnectionManager>,
    /// Readiness gate for freshly connected agents.
    pub readiness: Arc<ReadinessTracker>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/ws/agent", get(ws::ws_handler))
        .route("/api/sessions", post(http::create_session).get(http::list_sessions))
        .route("/api/sessions/{id}", delete(http::close_session))
        .route("/api/sessions/{id}/status", get(http::session_status))
        .route("/api/sessions/{id}/interactions", get(http::list_interactions))
        .route("/api/sessions/{id}/prompts", post(http::enqueue_prompt))
        .route(
            "/api/sessions/{id}/prompts/{interaction_id}/position",
            post(http::reorder_prompt),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve until the listener fails or the process stops.
pub async fn serve(bind_addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "moor server listening");
    axum::serve(listener, build_router(state)).await
}
