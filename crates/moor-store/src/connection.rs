//! Connection pool construction and schema migrations.

use std::path::Path;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::debug;

use crate::errors::Result;

/// Pooled `SQLite` connection handle.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;
/// One checked-out connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    context_id  TEXT,
    created     TEXT NOT NULL,
    updated     TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_context
    ON sessions(context_id) WHERE context_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS interactions (
    id               TEXT PRIMARY KEY,
    session_id       TEXT NOT NULL REFERENCES sessions(id),
    prompt           TEXT NOT NULL,
    response         TEXT NOT NULL DEFAULT '',
    state            TEXT NOT NULL,
    last_message_id  TEXT,
    created          TEXT NOT NULL,
    updated          TEXT NOT NULL,
    completed        TEXT
);

CREATE INDEX IF NOT EXISTS idx_interactions_session
    ON interactions(session_id, created);
CREATE INDEX IF NOT EXISTS idx_interactions_state
    ON interactions(session_id, state);
";

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Run idempotent schema migrations on a connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    debug!("store migrations applied");
    Ok(())
}

/// Open (or create) a file-backed database and run migrations.
pub fn new_pool(path: &Path) -> Result<ConnectionPool> {
    let manager =
        SqliteConnectionManager::file(path).with_init(|conn: &mut Connection| configure(conn));
    let pool = r2d2::Pool::builder().build(manager)?;
    let conn = pool.get()?;
    run_migrations(&conn)?;
    Ok(pool)
}

/// Open an in-memory database for tests.
///
/// Capped at a single connection: every `:memory:` connection is its own
/// database, so the pool must hand out the same one.
pub fn new_in_memory() -> Result<ConnectionPool> {
    let manager =
        SqliteConnectionManager::memory().with_init(|conn: &mut Connection| configure(conn));
    let pool = r2d2::Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    run_migrations(&conn)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_pool_has_schema() {
        let pool = new_in_memory().unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN ('sessions', 'interactions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn migrations_are_idempotent() {
        let pool = new_in_memory().unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn file_pool_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moor.db");
        let pool = new_pool(&path).unwrap();
        drop(pool);
        assert!(path.exists());
    }
}
