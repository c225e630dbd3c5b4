//! Context registry: the one place the two identifier spaces meet.
//!
//! Orchestrator sessions and remote-runtime contexts are independent state
//! spaces; the registry is the single bidirectional cross-reference between
//! them. Every inbound event that names a context and every outbound
//! dispatch for a session resolves through here, so no component ever
//! infers the mapping on its own.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{info, warn};

use moor_core::ids::{ContextId, SessionId};

use crate::errors::{EngineError, Result};

/// Bidirectional `SessionId` / `ContextId` map.
#[derive(Default)]
pub struct ContextRegistry {
    inner: RwLock<Maps>,
}

#[derive(Default)]
struct Maps {
    by_session: HashMap<SessionId, ContextId>,
    by_context: HashMap<ContextId, SessionId>,
}

impl ContextRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a context to a session.
    ///
    /// Returns `true` if the binding is new, `false` for an idempotent
    /// re-link of the identical pair. Fails with [`EngineError::AlreadyLinked`]
    /// if the session is bound to a *different* context; the association is
    /// immutable for the session's lifetime outside [`Self::relink`].
    pub fn link(&self, session: &SessionId, context: &ContextId) -> Result<bool> {
        let mut maps = self.inner.write();
        if let Some(existing) = maps.by_session.get(session) {
            if existing == context {
                return Ok(false);
            }
            return Err(EngineError::AlreadyLinked {
                session: session.clone(),
                existing: existing.clone(),
                requested: context.clone(),
            });
        }
        let _ = maps.by_session.insert(session.clone(), context.clone());
        let _ = maps.by_context.insert(context.clone(), session.clone());
        info!(session_id = %session, context_id = %context, "context linked");
        Ok(true)
    }

    /// Replace a session's binding. Privileged administrative operation,
    /// not part of normal flow. Stale forward and reverse entries are
    /// dropped.
    pub fn relink(&self, session: &SessionId, context: &ContextId) {
        let mut maps = self.inner.write();
        if let Some(old) = maps.by_session.insert(session.clone(), context.clone()) {
            let _ = maps.by_context.remove(&old);
            warn!(session_id = %session, old_context = %old, new_context = %context, "context relinked");
        }
        // A context can serve at most one session; steal it if bound elsewhere.
        if let Some(old_session) = maps.by_context.insert(context.clone(), session.clone()) {
            if old_session != *session {
                let _ = maps.by_session.remove(&old_session);
                warn!(context_id = %context, old_session = %old_session, "context stolen from session");
            }
        }
    }

    /// The context bound to a session, if any.
    pub fn resolve_context(&self, session: &SessionId) -> Option<ContextId> {
        self.inner.read().by_session.get(session).cloned()
    }

    /// The session a context is bound to, if any.
    pub fn resolve_session(&self, context: &ContextId) -> Option<SessionId> {
        self.inner.read().by_context.get(context).cloned()
    }

    /// Drop a session's binding (session close).
    pub fn unlink_session(&self, session: &SessionId) {
        let mut maps = self.inner.write();
        if let Some(context) = maps.by_session.remove(session) {
            let _ = maps.by_context.remove(&context);
        }
    }

    /// Bulk-load persisted bindings (startup rebuild). Existing entries
    /// are preserved; conflicting pairs are skipped with a warning.
    pub fn load(&self, pairs: impl IntoIterator<Item = (SessionId, ContextId)>) -> usize {
        let mut restored = 0;
        for (session, context) in pairs {
            match self.link(&session, &context) {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "skipping conflicting persisted binding"),
            }
        }
        restored
    }

    /// Number of linked pairs.
    pub fn len(&self) -> usize {
        self.inner.read().by_session.len()
    }

    /// Whether no pairs are linked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ids(session: &str, context: &str) -> (SessionId, ContextId) {
        (SessionId::from_raw(session), ContextId::from_raw(context))
    }

    #[test]
    fn link_and_resolve_both_directions() {
        let registry = ContextRegistry::new();
        let (session, context) = ids("ses_1", "ctx-1");
        assert!(registry.link(&session, &context).unwrap());

        assert_eq!(registry.resolve_context(&session), Some(context.clone()));
        assert_eq!(registry.resolve_session(&context), Some(session));
    }

    #[test]
    fn link_identical_pair_is_idempotent() {
        let registry = ContextRegistry::new();
        let (session, context) = ids("ses_1", "ctx-1");
        assert!(registry.link(&session, &context).unwrap());
        assert!(!registry.link(&session, &context).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn link_conflicting_context_fails() {
        let registry = ContextRegistry::new();
        let (session, context) = ids("ses_1", "ctx-1");
        registry.link(&session, &context).unwrap();

        let err = registry
            .link(&session, &ContextId::from_raw("ctx-2"))
            .unwrap_err();
        assert_matches!(err, EngineError::AlreadyLinked { ref existing, .. } if existing.as_str() == "ctx-1");
        // Original binding intact
        assert_eq!(registry.resolve_context(&session), Some(context));
    }

    #[test]
    fn resolve_unknown_is_none() {
        let registry = ContextRegistry::new();
        assert!(registry.resolve_context(&SessionId::from_raw("ses_x")).is_none());
        assert!(registry.resolve_session(&ContextId::from_raw("ctx-x")).is_none());
    }

    #[test]
    fn relink_replaces_binding_and_drops_stale_reverse() {
        let registry = ContextRegistry::new();
        let (session, old) = ids("ses_1", "ctx-old");
        registry.link(&session, &old).unwrap();

        let new = ContextId::from_raw("ctx-new");
        registry.relink(&session, &new);

        assert_eq!(registry.resolve_context(&session), Some(new.clone()));
        assert_eq!(registry.resolve_session(&new), Some(session));
        assert!(registry.resolve_session(&old).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn relink_steals_context_from_other_session() {
        let registry = ContextRegistry::new();
        let (first, context) = ids("ses_1", "ctx-1");
        registry.link(&first, &context).unwrap();

        let second = SessionId::from_raw("ses_2");
        registry.relink(&second, &context);

        assert_eq!(registry.resolve_session(&context), Some(second.clone()));
        assert_eq!(registry.resolve_context(&second), Some(context));
        assert!(registry.resolve_context(&first).is_none());
    }

    #[test]
    fn unlink_session_clears_both_directions() {
        let registry = ContextRegistry::new();
        let (session, context) = ids("ses_1", "ctx-1");
        registry.link(&session, &context).unwrap();

        registry.unlink_session(&session);
        assert!(registry.is_empty());
        assert!(registry.resolve_session(&context).is_none());
    }

    #[test]
    fn load_restores_persisted_pairs() {
        let registry = ContextRegistry::new();
        let restored = registry.load(vec![
            ids("ses_1", "ctx-1"),
            ids("ses_2", "ctx-2"),
            ids("ses_1", "ctx-1"), // duplicate, idempotent
        ]);
        assert_eq!(restored, 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn load_skips_conflicts() {
        let registry = ContextRegistry::new();
        let (session, context) = ids("ses_1", "ctx-live");
        registry.link(&session, &context).unwrap();

        let restored = registry.load(vec![ids("ses_1", "ctx-stale")]);
        assert_eq!(restored, 0);
        assert_eq!(registry.resolve_context(&session), Some(context));
    }
}
