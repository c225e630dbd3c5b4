//! # moor-server
//!
//! HTTP API and agent WebSocket transport for the Moor orchestrator.
//!
//! The HTTP side exposes session and prompt management; the WebSocket
//! side carries the duplex protocol with remote agent runtimes. The
//! [`connection::ConnectionManager`] doubles as the engine's instruction
//! router, so this crate owns both directions of the wire.
//!
//! ## Crate Position
//!
//! Depends on: moor-core, moor-store, moor-engine.
//! Depended on by: moor-agentd.

#![deny(unsafe_code)]

pub mod connection;
pub mod http;
pub mod readiness;
pub mod state;
pub mod ws;

#[cfg(test)]
pub(crate) mod testutil;

pub use connection::ConnectionManager;
pub use readiness::ReadinessTracker;
pub use state::{AppState, build_router, serve};
