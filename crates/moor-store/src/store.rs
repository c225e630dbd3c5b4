//! Session/interaction repository.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, instrument};

use moor_core::ids::{ContextId, InteractionId, SessionId};
use moor_core::session::{Interaction, InteractionState, Session};

use crate::connection::ConnectionPool;
use crate::errors::{Result, StoreError};

/// Durable storage for [`Session`] and [`Interaction`] records.
///
/// The engine reads and writes through this type; schema and migrations
/// live in [`crate::connection`]. All methods are synchronous; callers
/// hold a pooled connection only for the duration of one statement.
pub struct SessionStore {
    pool: ConnectionPool,
}

impl SessionStore {
    /// Wrap a migrated connection pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Insert a new session.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "INSERT INTO sessions (id, name, context_id, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.id.as_str(),
                session.name,
                session.context_id.as_ref().map(ContextId::as_str),
                session.created.to_rfc3339(),
                session.updated.to_rfc3339(),
            ],
        )?;
        debug!("session created");
        Ok(())
    }

    /// Fetch a session by id.
    pub fn get_session(&self, id: &SessionId) -> Result<Option<Session>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, name, context_id, created, updated FROM sessions WHERE id = ?1",
            params![id.as_str()],
            session_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// All sessions, oldest first.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, context_id, created, updated FROM sessions ORDER BY created",
        )?;
        let rows = stmt.query_map([], session_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    /// Persist the context link for a session.
    #[instrument(skip(self))]
    pub fn set_context(&self, id: &SessionId, context: &ContextId) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE sessions SET context_id = ?2, updated = ?3 WHERE id = ?1",
            params![id.as_str(), context.as_str(), Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Reverse lookup: the session a context is linked to, if any.
    ///
    /// Used to rebuild in-memory routing state after a restart.
    pub fn find_session_by_context(&self, context: &ContextId) -> Result<Option<Session>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, name, context_id, created, updated FROM sessions WHERE context_id = ?1",
            params![context.as_str()],
            session_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// All sessions that have a linked context, for registry rebuild.
    pub fn linked_sessions(&self) -> Result<Vec<(SessionId, ContextId)>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare("SELECT id, context_id FROM sessions WHERE context_id IS NOT NULL")?;
        let rows = stmt.query_map([], |row| {
            let session: String = row.get(0)?;
            let context: String = row.get(1)?;
            Ok((SessionId::from(session), ContextId::from(context)))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    // ── Interactions ────────────────────────────────────────────────────

    /// Insert a new interaction.
    #[instrument(skip(self, interaction), fields(interaction_id = %interaction.id))]
    pub fn create_interaction(&self, interaction: &Interaction) -> Result<()> {
        let conn = self.pool.get()?;
        let _ = conn.execute(
            "INSERT INTO interactions
                 (id, session_id, prompt, response, state, last_message_id,
                  created, updated, completed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                interaction.id.as_str(),
                interaction.session_id.as_str(),
                interaction.prompt,
                interaction.response,
                interaction.state.as_str(),
                interaction.last_message_id.as_ref().map(|m| m.as_str()),
                interaction.created.to_rfc3339(),
                interaction.updated.to_rfc3339(),
                interaction.completed.map(|t| t.to_rfc3339()),
            ],
        )?;
        debug!("interaction created");
        Ok(())
    }

    /// Fetch an interaction by id.
    pub fn get_interaction(&self, id: &InteractionId) -> Result<Option<Interaction>> {
        let conn = self.pool.get()?;
        conn.query_row(
            &format!("{INTERACTION_SELECT} WHERE id = ?1"),
            params![id.as_str()],
            interaction_from_row,
        )
        .optional()?
        .transpose()
    }

    /// Full-row update of an existing interaction.
    #[instrument(skip(self, interaction), fields(interaction_id = %interaction.id, state = interaction.state.as_str()))]
    pub fn update_interaction(&self, interaction: &Interaction) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE interactions SET
                 response = ?2, state = ?3, last_message_id = ?4,
                 updated = ?5, completed = ?6
             WHERE id = ?1",
            params![
                interaction.id.as_str(),
                interaction.response,
                interaction.state.as_str(),
                interaction.last_message_id.as_ref().map(|m| m.as_str()),
                interaction.updated.to_rfc3339(),
                interaction.completed.map(|t| t.to_rfc3339()),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "interaction",
                id: interaction.id.to_string(),
            });
        }
        Ok(())
    }

    /// All interactions for a session, oldest first.
    pub fn list_interactions(&self, session: &SessionId) -> Result<Vec<Interaction>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "{INTERACTION_SELECT} WHERE session_id = ?1 ORDER BY created"
        ))?;
        let rows = stmt.query_map(params![session.as_str()], interaction_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .collect()
    }

    /// The most recent `sent`/`streaming` interaction for a session, if any.
    ///
    /// This is the fallback-resolution target when a completion event
    /// carries no request id.
    pub fn latest_in_flight(&self, session: &SessionId) -> Result<Option<Interaction>> {
        let conn = self.pool.get()?;
        conn.query_row(
            &format!(
                "{INTERACTION_SELECT}
                 WHERE session_id = ?1 AND state IN ('sent', 'streaming')
                 ORDER BY created DESC LIMIT 1"
            ),
            params![session.as_str()],
            interaction_from_row,
        )
        .optional()?
        .transpose()
    }
}

const INTERACTION_SELECT: &str = "SELECT id, session_id, prompt, response, state, \
     last_message_id, created, updated, completed FROM interactions";

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let created: String = row.get(3)?;
    let updated: String = row.get(4)?;
    Ok(Session {
        id: SessionId::from(row.get::<_, String>(0)?),
        name: row.get(1)?,
        context_id: row.get::<_, Option<String>>(2)?.map(ContextId::from),
        created: parse_timestamp(&created)?,
        updated: parse_timestamp(&updated)?,
    })
}

fn interaction_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Interaction>> {
    let id: String = row.get(0)?;
    let state_raw: String = row.get(4)?;
    let Some(state) = InteractionState::parse(&state_raw) else {
        return Ok(Err(StoreError::Corrupt {
            entity: "interaction",
            id,
            detail: format!("unknown state {state_raw:?}"),
        }));
    };
    let created: String = row.get(6)?;
    let updated: String = row.get(7)?;
    let completed: Option<String> = row.get(8)?;
    let completed = match completed {
        Some(raw) => Some(parse_timestamp(&raw)?),
        None => None,
    };
    Ok(Ok(Interaction {
        id: InteractionId::from(id),
        session_id: SessionId::from(row.get::<_, String>(1)?),
        prompt: row.get(2)?,
        response: row.get(3)?,
        state,
        last_message_id: row
            .get::<_, Option<String>>(5)?
            .map(moor_core::ids::MessageId::from),
        created: parse_timestamp(&created)?,
        updated: parse_timestamp(&updated)?,
        completed,
    }))
}
