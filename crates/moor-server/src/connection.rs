//! Agent connection registry and outbound routing.
//!
//! Each remote runtime holds one WebSocket serving one session. The
//! registry maps sessions to the send side of their connection and
//! implements the engine's [`InstructionRouter`] seam: dispatch is a
//! non-blocking `try_send` into the connection's bounded queue, and any
//! failure surfaces as `NoRoute` so the engine keeps the instruction
//! queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use moor_core::ids::SessionId;
use moor_core::protocol::AgentCommand;
use moor_engine::{EngineError, InstructionRouter};

use crate::readiness::ReadinessTracker;

/// Outbound queue capacity per connection.
const MAX_SEND_QUEUE: usize = 256;

/// Unique identifier for one WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7().simple()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Send half of one agent WebSocket.
pub struct AgentConnection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Session this connection serves.
    pub session_id: SessionId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
}

impl AgentConnection {
    /// Whether the writer loop is still draining this connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

/// Registry of live agent connections, keyed by session.
///
/// A session has at most one serving connection; registering a new one
/// for the same session replaces the old entry (reconnect). Dispatch is
/// additionally gated on the readiness tracker: a connected but
/// not-yet-ready agent counts as no route.
pub struct ConnectionManager {
    by_session: DashMap<SessionId, Arc<AgentConnection>>,
    readiness: Arc<ReadinessTracker>,
}

impl ConnectionManager {
    /// Create an empty registry gated on `readiness`.
    pub fn new(readiness: Arc<ReadinessTracker>) -> Self {
        Self {
            by_session: DashMap::new(),
            readiness,
        }
    }

    /// Register a connection for a session. Returns the connection handle
    /// and the receive side its writer loop drains.
    pub fn register(&self, session_id: SessionId) -> (Arc<AgentConnection>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(MAX_SEND_QUEUE);
        let connection = Arc::new(AgentConnection {
            id: ConnectionId::new(),
            session_id: session_id.clone(),
            tx,
            connected: AtomicBool::new(true),
        });
        if let Some(old) = self
            .by_session
            .insert(session_id.clone(), Arc::clone(&connection))
        {
            old.mark_disconnected();
            info!(session_id = %session_id, old_conn = %old.id, "replaced stale agent connection");
        }
        metrics::gauge!("moor_agent_connections").set(self.by_session.len() as f64);
        info!(session_id = %session_id, conn_id = %connection.id, "agent connected");
        (connection, rx)
    }

    /// Remove a connection. Only removes the registry entry if it still
    /// points at this connection; a reconnect may have replaced it.
    pub fn unregister(&self, connection: &AgentConnection) {
        connection.mark_disconnected();
        let removed = self
            .by_session
            .remove_if(&connection.session_id, |_, current| {
                current.id == connection.id
            })
            .is_some();
        if removed {
            metrics::gauge!("moor_agent_connections").set(self.by_session.len() as f64);
            info!(session_id = %connection.session_id, conn_id = %connection.id, "agent disconnected");
        }
    }

    /// Whether a live connection serves the session.
    pub fn has_route(&self, session_id: &SessionId) -> bool {
        self.by_session
            .get(session_id)
            .is_some_and(|c| c.is_connected())
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.by_session.len()
    }
}

impl InstructionRouter for ConnectionManager {
    fn dispatch(&self, command: &AgentCommand) -> moor_engine::Result<()> {
        let session_id = command.session_id();
        let Some(connection) = self.by_session.get(session_id) else {
            return Err(EngineError::NoRoute(session_id.clone()));
        };
        if !connection.is_connected() || self.readiness.is_waiting(session_id) {
            return Err(EngineError::NoRoute(session_id.clone()));
        }
        let json = match serde_json::to_string(command) {
            Ok(json) => json,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "failed to serialize command");
                return Err(EngineError::NoRoute(session_id.clone()));
            }
        };
        match connection.tx.try_send(json) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %session_id, "agent send queue full");
                metrics::counter!("moor_dispatch_backpressure_total").increment(1);
                Err(EngineError::NoRoute(session_id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EngineError::NoRoute(session_id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use moor_core::ids::{ContextId, RequestId};
    use std::time::Duration;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Arc::new(ReadinessTracker::new(Duration::from_secs(60))))
    }

    fn command(session: &str) -> AgentCommand {
        AgentCommand::Instruction {
            session_id: SessionId::from_raw(session),
            context_id: Some(ContextId::from_raw("ctx-1")),
            request_id: RequestId::from_raw("req_1"),
            content: "do it".into(),
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_serialized_command() {
        let manager = manager();
        let (_conn, mut rx) = manager.register(SessionId::from_raw("ses_1"));

        manager.dispatch(&command("ses_1")).unwrap();
        let raw = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["type"], "instruction");
        assert_eq!(parsed["session_id"], "ses_1");
        assert_eq!(parsed["context_id"], "ctx-1");
    }

    #[tokio::test]
    async fn dispatch_without_connection_is_no_route() {
        let manager = manager();
        let err = manager.dispatch(&command("ses_1")).unwrap_err();
        assert_matches!(err, EngineError::NoRoute(_));
    }

    #[tokio::test]
    async fn unregister_removes_route() {
        let manager = manager();
        let (conn, _rx) = manager.register(SessionId::from_raw("ses_1"));
        assert!(manager.has_route(&SessionId::from_raw("ses_1")));

        manager.unregister(&conn);
        assert!(!manager.has_route(&SessionId::from_raw("ses_1")));
        assert_matches!(
            manager.dispatch(&command("ses_1")).unwrap_err(),
            EngineError::NoRoute(_)
        );
    }

    #[tokio::test]
    async fn reconnect_replaces_old_connection() {
        let manager = manager();
        let (old, _old_rx) = manager.register(SessionId::from_raw("ses_1"));
        let (_new, mut new_rx) = manager.register(SessionId::from_raw("ses_1"));
        assert_eq!(manager.count(), 1);
        assert!(!old.is_connected());

        manager.dispatch(&command("ses_1")).unwrap();
        assert!(new_rx.try_recv().is_ok());

        // Unregistering the stale connection must not tear down the new one.
        manager.unregister(&old);
        assert!(manager.has_route(&SessionId::from_raw("ses_1")));
    }

    #[tokio::test]
    async fn waiting_session_is_gated() {
        let readiness = Arc::new(ReadinessTracker::new(Duration::from_secs(60)));
        let manager = ConnectionManager::new(Arc::clone(&readiness));
        let session = SessionId::from_raw("ses_1");
        let (_conn, mut rx) = manager.register(session.clone());

        // Simulate the gate being up without spawning the grace timer.
        let store = Arc::new(moor_store::SessionStore::new(
            moor_store::new_in_memory().unwrap(),
        ));
        let engine = moor_engine::SyncEngine::new(
            store,
            moor_engine::testutil::RecordingRouter::new(),
            moor_engine::SyncConfig::default(),
        )
        .unwrap();
        readiness.begin_waiting(&session, &engine);

        assert_matches!(
            manager.dispatch(&command("ses_1")).unwrap_err(),
            EngineError::NoRoute(_)
        );
        assert!(rx.try_recv().is_err());

        // Gate drops; dispatch flows.
        let _ = readiness.mark_ready(&session);
        manager.dispatch(&command("ses_1")).unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_queue_is_no_route() {
        let manager = manager();
        let (_conn, _rx) = manager.register(SessionId::from_raw("ses_1"));

        let mut last = Ok(());
        for _ in 0..=MAX_SEND_QUEUE {
            last = manager.dispatch(&command("ses_1"));
        }
        assert_matches!(last.unwrap_err(), EngineError::NoRoute(_));
    }
}
