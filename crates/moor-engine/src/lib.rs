//! # moor-engine
//!
//! The session/context synchronization protocol engine.
//!
//! Drives remote coding-agent runtimes over a duplex channel: serializes
//! instructions per session, correlates asynchronous completions back to
//! their requests, accumulates streamed partial responses, and enforces a
//! timeout on every dispatched instruction so no session wedges on a
//! silent agent.
//!
//! [`SyncEngine`] is the facade; everything else is internal machinery it
//! composes. The transport seam is [`InstructionRouter`]: the server crate
//! implements it over live connections, tests over an in-memory recorder.
//!
//! ## Crate Position
//!
//! Depends on: moor-core, moor-settings, moor-store.
//! Depended on by: moor-server, moor-agentd.

#![deny(unsafe_code)]

pub mod accumulator;
pub mod correlator;
pub mod engine;
pub mod errors;
pub mod queue;
pub mod registry;
pub mod router;
pub mod testutil;
pub mod timeout;

pub use engine::{SessionStatus, SyncConfig, SyncEngine};
pub use errors::{EngineError, Result};
pub use router::InstructionRouter;
