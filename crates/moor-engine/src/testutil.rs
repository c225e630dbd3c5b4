//! Shared test utilities for engine tests.
//!
//! `RecordingRouter` stands in for the live connection layer in unit
//! tests, the integration suite, and downstream crates' tests.

use std::sync::Arc;

use parking_lot::Mutex;

use moor_core::ids::SessionId;
use moor_core::protocol::AgentCommand;

use crate::errors::{EngineError, Result};
use crate::router::InstructionRouter;

/// Router that records every dispatched command instead of sending it.
///
/// Routes are open by default; `close_route` makes dispatch for that
/// session fail with `NoRoute`, simulating a disconnected agent.
#[derive(Default)]
pub struct RecordingRouter {
    sent: Mutex<Vec<AgentCommand>>,
    closed: Mutex<Vec<SessionId>>,
}

impl RecordingRouter {
    /// Create a shared recorder with every route open.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate the agent for `session` going away.
    pub fn close_route(&self, session: &SessionId) {
        self.closed.lock().push(session.clone());
    }

    /// Restore the route for `session`.
    pub fn open_route(&self, session: &SessionId) {
        self.closed.lock().retain(|s| s != session);
    }

    /// All commands dispatched so far, in order.
    pub fn sent(&self) -> Vec<AgentCommand> {
        self.sent.lock().clone()
    }

    /// Number of commands dispatched.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// The most recent command, if any.
    pub fn last(&self) -> Option<AgentCommand> {
        self.sent.lock().last().cloned()
    }
}

impl InstructionRouter for RecordingRouter {
    fn dispatch(&self, command: &AgentCommand) -> Result<()> {
        let AgentCommand::Instruction { session_id, .. } = command;
        if self.closed.lock().contains(session_id) {
            return Err(EngineError::NoRoute(session_id.clone()));
        }
        self.sent.lock().push(command.clone());
        Ok(())
    }
}
