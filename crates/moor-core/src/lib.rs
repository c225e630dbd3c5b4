//! # moor-core
//!
//! Foundation types for the Moor synchronization engine.
//!
//! This crate provides the shared vocabulary that all other Moor crates
//! depend on:
//!
//! - **Branded IDs**: [`ids::SessionId`], [`ids::ContextId`],
//!   [`ids::RequestId`], [`ids::InteractionId`], [`ids::MessageId`]
//! - **Wire protocol**: [`protocol::AgentCommand`] (outbound) and
//!   [`protocol::AgentEvent`] (inbound), tagged JSON enums
//! - **Domain model**: [`session::Session`], [`session::Interaction`] and
//!   the [`session::InteractionState`] machine
//! - **Logging**: [`logging::init_logging`] env-filter setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other moor crates.

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod protocol;
pub mod session;

pub use ids::{ContextId, InteractionId, MessageId, RequestId, SessionId};
pub use protocol::{AgentCommand, AgentEvent};
pub use session::{Interaction, InteractionState, Session, NO_RESPONSE_SENTINEL};
