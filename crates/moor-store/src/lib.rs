//! # moor-store
//!
//! SQLite persistence for Moor sessions and interactions.
//!
//! The protocol engine reads and writes [`SessionStore`]; this crate owns
//! the schema, migrations, and connection pooling. [`new_in_memory`] gives
//! tests a throwaway database with the same schema.
//!
//! ## Crate Position
//!
//! Depends on: moor-core. Depended on by: moor-engine, moor-agentd.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod store;

pub use connection::{ConnectionPool, PooledConnection, new_in_memory, new_pool, run_migrations};
pub use errors::{Result, StoreError};
pub use store::SessionStore;
