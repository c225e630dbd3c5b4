//! Agent WebSocket endpoint.
//!
//! One socket per remote runtime, serving one session named in the query
//! string. The writer half drains the connection's send queue and pings on
//! an interval; the reader half parses every text frame as an
//! [`AgentEvent`] and feeds it to the engine. Malformed frames are logged
//! and dropped, never fatal to the connection.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use moor_core::ids::SessionId;
use moor_core::protocol::AgentEvent;

use crate::state::AppState;

/// Outbound keepalive interval. Shorter than typical 60s proxy idle
/// timeouts.
const PING_INTERVAL: Duration = Duration::from_secs(54);

#[derive(Debug, Deserialize)]
pub(crate) struct WsParams {
    session_id: String,
}

/// Upgrade handler for `GET /ws/agent?session_id=...`.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let session_id = SessionId::from_raw(params.session_id);
    match state.engine.store().get_session(&session_id) {
        Ok(Some(_)) => {}
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, "session lookup failed during ws upgrade");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
        .into_response()
}

/// Drive one agent connection to completion.
async fn handle_socket(socket: WebSocket, session_id: SessionId, state: AppState) {
    let (connection, mut rx) = state.connections.register(session_id.clone());
    state.readiness.begin_waiting(&session_id, &state.engine);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_session = session_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    debug!(session_id = %writer_session, "ping sent");
                }
            }
        }
    });

    let reader_state = state.clone();
    let reader_session = session_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    process_frame(&reader_state, &reader_session, &text);
                }
                WsMessage::Close(_) => break,
                // axum answers pings automatically; inbound pongs need no
                // bookkeeping because the engine's timeout supervisor
                // already bounds agent silence.
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.readiness.forget(&session_id);
    state.connections.unregister(&connection);
    info!(session_id = %session_id, conn_id = %connection.id, "agent socket closed");
}

/// Parse and apply one inbound text frame.
fn process_frame(state: &AppState, session_id: &SessionId, text: &str) {
    let event: AgentEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "unparseable agent frame dropped");
            metrics::counter!("moor_bad_frames_total").increment(1);
            return;
        }
    };
    // Drop the readiness gate before the engine tries to dispatch the
    // queue head, or the release attempt would see no route.
    if let AgentEvent::AgentReady { session_id: ready } = &event {
        let _ = state.readiness.mark_ready(ready);
    }
    if let Err(e) = state.engine.handle_event(event) {
        warn!(session_id = %session_id, error = %e, "event handling failed");
    }
}
