//! Store error types.

use thiserror::Error;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool failure.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// An update targeted a row that does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("session" or "interaction").
        entity: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// A stored value could not be decoded (corrupt state string, bad
    /// timestamp).
    #[error("corrupt row for {entity} {id}: {detail}")]
    Corrupt {
        /// Entity kind.
        entity: &'static str,
        /// Row identifier.
        id: String,
        /// What failed to decode.
        detail: String,
    },
}
