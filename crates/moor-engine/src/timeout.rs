//! Timeout supervisor.
//!
//! One detached task per scheduled deadline, all tied to a shared
//! [`CancellationToken`] so engine shutdown reaps every outstanding timer
//! at once. Firing is advisory: the callback races resolution through the
//! correlator's claim-by-removal, so a timer that loses the race simply
//! finds nothing to claim.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Spawns and cancels deadline tasks for in-flight requests.
pub struct TimeoutSupervisor {
    cancel: CancellationToken,
}

impl TimeoutSupervisor {
    /// Create a supervisor with a fresh cancellation root.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// Schedule `on_fire` to run after `after`, unless the supervisor is
    /// shut down first. The callback must do its own staleness check; the
    /// supervisor never knows whether the request already resolved.
    pub fn schedule<F>(&self, after: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = self.cancel.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(after) => on_fire(),
            }
        }));
    }

    /// Cancel all outstanding timers. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
