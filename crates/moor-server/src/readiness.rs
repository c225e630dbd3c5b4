//! Agent readiness gating.
//!
//! A freshly connected runtime accepts the WebSocket before its agent has
//! finished loading, and instructions sent during that window are lost.
//! The tracker holds each session in a waiting state from connection until
//! the agent's ready announcement; while waiting, the connection manager
//! refuses dispatch so the engine keeps instructions queued. A grace timer
//! force-releases the session in case the announcement never arrives
//! (older runtimes do not send one).
//!
//! Release always funnels through the engine's route-ready hook so the
//! queue head goes out exactly once, whichever path fired.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use moor_core::ids::SessionId;
use moor_engine::SyncEngine;

/// Tracks which sessions are still waiting for their agent to come up.
pub struct ReadinessTracker {
    waiting: Arc<DashMap<SessionId, CancellationToken>>,
    grace: Duration,
}

impl ReadinessTracker {
    /// Create a tracker with the given fallback grace period.
    pub fn new(grace: Duration) -> Self {
        Self {
            waiting: Arc::new(DashMap::new()),
            grace,
        }
    }

    /// A connection came up for `session_id`. Marks the session waiting
    /// and arms the grace timer: if no ready announcement arrives in time,
    /// the session is released anyway.
    pub fn begin_waiting(&self, session_id: &SessionId, engine: &Arc<SyncEngine>) {
        let token = CancellationToken::new();
        if let Some(old) = self.waiting.insert(session_id.clone(), token.clone()) {
            old.cancel();
        }

        let session_id = session_id.clone();
        let engine = Arc::clone(engine);
        let waiting = Arc::clone(&self.waiting);
        let grace = self.grace;
        drop(tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    // Still ours: a reconnect would have cancelled this
                    // token when it re-armed the gate.
                    let _ = waiting.remove(&session_id);
                    warn!(session_id = %session_id, "agent never announced ready, releasing after grace");
                    metrics::counter!("moor_ready_grace_expired_total").increment(1);
                    if let Err(e) = engine.on_route_ready(&session_id) {
                        warn!(session_id = %session_id, error = %e, "grace release failed");
                    }
                }
            }
        }));
    }

    /// The agent announced it is ready. Cancels the grace timer. Returns
    /// `true` if the session was actually waiting.
    pub fn mark_ready(&self, session_id: &SessionId) -> bool {
        if let Some((_, token)) = self.waiting.remove(session_id) {
            token.cancel();
            info!(session_id = %session_id, "agent ready");
            return true;
        }
        false
    }

    /// The connection went away; stop waiting and disarm the timer.
    pub fn forget(&self, session_id: &SessionId) {
        if let Some((_, token)) = self.waiting.remove(session_id) {
            token.cancel();
        }
    }

    /// Whether the session is still gated on readiness.
    pub fn is_waiting(&self, session_id: &SessionId) -> bool {
        self.waiting.contains_key(session_id)
    }
}
