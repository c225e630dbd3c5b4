//! Engine error taxonomy.
//!
//! Nothing here is fatal to the process. `NoRoute` is recoverable (retry
//! after the readiness signal); `AlreadyLinked` is surfaced to the caller
//! and never auto-resolved. Duplicate completions and fallback misses are
//! deliberately *not* errors; they are logged and ignored, because
//! asynchronous correlation failures must never surface to the end user.

use thiserror::Error;

use moor_core::ids::{ContextId, InteractionId, SessionId};
use moor_store::StoreError;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the synchronization engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No live connection currently serves the session's context. The
    /// instruction stays queued; the caller retries after the readiness
    /// signal.
    #[error("no route to agent for session {0}")]
    NoRoute(SessionId),

    /// The session already has a different context bound. Linking the
    /// identical pair again is an idempotent no-op, not this error.
    #[error("session {session} already linked to context {existing} (requested {requested})")]
    AlreadyLinked {
        /// Session whose binding conflicted.
        session: SessionId,
        /// The context currently bound.
        existing: ContextId,
        /// The conflicting context from the link attempt.
        requested: ContextId,
    },

    /// The named session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The named interaction does not exist (or is no longer pending, for
    /// reorder operations).
    #[error("interaction not found: {0}")]
    InteractionNotFound(InteractionId),

    /// An interrupt dispatch was requested but interrupts are disabled in
    /// configuration.
    #[error("interrupt dispatch is disabled")]
    InterruptDisabled,

    /// The session has been closed; no further instructions are accepted.
    #[error("session closed: {0}")]
    SessionClosed(SessionId),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}
