//! HTTP API handlers.
//!
//! Thin adapters over [`SyncEngine`] operations: parse the request, call
//! the engine, map `EngineError` to a status code. No protocol logic
//! lives here.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use moor_core::ids::{InteractionId, SessionId};
use moor_core::session::{Interaction, Session};
use moor_engine::{EngineError, SessionStatus};

use crate::state::AppState;

/// Engine error mapped onto an HTTP response.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::SessionNotFound(_) | EngineError::InteractionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            EngineError::AlreadyLinked { .. } | EngineError::SessionClosed(_) => {
                StatusCode::CONFLICT
            }
            EngineError::InterruptDisabled => StatusCode::FORBIDDEN,
            EngineError::NoRoute(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub(crate) async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateSessionRequest {
    name: String,
}

pub(crate) async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.engine.create_session(&req.name)?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub(crate) async fn list_sessions(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Session>>> {
    let sessions = state
        .engine
        .store()
        .list_sessions()
        .map_err(EngineError::from)?;
    Ok(Json(sessions))
}

pub(crate) async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.close_session(&SessionId::from_raw(id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionStatus>> {
    let status = state.engine.status(&SessionId::from_raw(id))?;
    Ok(Json(status))
}

pub(crate) async fn list_interactions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Interaction>>> {
    let session_id = SessionId::from_raw(id);
    // Distinguish an unknown session from an empty transcript.
    if state
        .engine
        .store()
        .get_session(&session_id)
        .map_err(EngineError::from)?
        .is_none()
    {
        return Err(EngineError::SessionNotFound(session_id).into());
    }
    let interactions = state
        .engine
        .store()
        .list_interactions(&session_id)
        .map_err(EngineError::from)?;
    Ok(Json(interactions))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PromptRequest {
    content: String,
    #[serde(default)]
    interrupt: bool,
}

pub(crate) async fn enqueue_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PromptRequest>,
) -> ApiResult<(StatusCode, Json<Interaction>)> {
    let interaction =
        state
            .engine
            .enqueue(&SessionId::from_raw(id), &req.content, req.interrupt)?;
    Ok((StatusCode::ACCEPTED, Json(interaction)))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PositionRequest {
    position: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReorderResponse {
    queued: Vec<InteractionId>,
}

pub(crate) async fn reorder_prompt(
    State(state): State<AppState>,
    Path((id, interaction_id)): Path<(String, String)>,
    Json(req): Json<PositionRequest>,
) -> ApiResult<Json<ReorderResponse>> {
    let queued = state.engine.reorder(
        &SessionId::from_raw(id),
        &InteractionId::from_raw(interaction_id),
        req.position,
    )?;
    Ok(Json(ReorderResponse { queued }))
}
