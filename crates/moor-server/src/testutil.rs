//! Shared test helpers for server handlers.

use std::sync::Arc;
use std::time::Duration;

use moor_engine::{InstructionRouter, SyncConfig, SyncEngine};
use moor_store::{SessionStore, new_in_memory};

use crate::connection::ConnectionManager;
use crate::readiness::ReadinessTracker;
use crate::state::AppState;

/// Build an [`AppState`] over an in-memory store with the connection
/// manager wired in as the engine's router, exactly like production.
pub(crate) fn make_state() -> AppState {
    let store = Arc::new(SessionStore::new(new_in_memory().unwrap()));
    let readiness = Arc::new(ReadinessTracker::new(Duration::from_secs(60)));
    let connections = Arc::new(ConnectionManager::new(Arc::clone(&readiness)));
    let engine = SyncEngine::new(
        store,
        Arc::clone(&connections) as Arc<dyn InstructionRouter>,
        SyncConfig::default(),
    )
    .unwrap();
    AppState {
        engine,
        connections,
        readiness,
    }
}
