//! Outbound instruction routing seam.
//!
//! The engine never touches sockets. It hands fully-formed commands to an
//! [`InstructionRouter`]; the server crate implements it over live agent
//! connections, and tests implement it with an in-memory recorder.

use moor_core::protocol::AgentCommand;

use crate::errors::Result;

/// Delivers commands to whatever transport currently serves the session.
///
/// `dispatch` must be synchronous and non-blocking: implementations hand
/// the command to a send queue (or fail fast with
/// [`EngineError::NoRoute`](crate::errors::EngineError::NoRoute)) rather
/// than performing I/O inline.
pub trait InstructionRouter: Send + Sync {
    /// Deliver a command, or fail if no live route exists.
    fn dispatch(&self, command: &AgentCommand) -> Result<()>;
}
