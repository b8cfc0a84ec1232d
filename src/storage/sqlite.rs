//! `SQLite`-backed session store.
//!
//! Two tables: `sessions` holds directory entries, `chat_states` holds the
//! JSON-encoded [`ChatState`] of each session. Multi-table writes run in a
//! single transaction.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use rusqlite::types::Type;
use tokio_rusqlite::Connection;

use super::{SessionStore, StoreError, StoreFuture, StoreResult};
use crate::chat::{ChatState, SessionId, SessionInfo};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        last_active INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_last_active
        ON sessions (last_active DESC);
    CREATE TABLE IF NOT EXISTS chat_states (
        session_id TEXT PRIMARY KEY,
        payload TEXT NOT NULL
    );";

/// `SQLite` implementation of [`SessionStore`].
pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    /// Open (or create) the database file and ensure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref().to_path_buf()).await?;
        Self::with_connection(conn).await
    }

    /// Private in-memory database, mostly for tests.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionInfo> {
    let raw_id: String = row.get(0)?;
    let id = SessionId::parse(&raw_id)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err)))?;
    Ok(SessionInfo {
        id,
        title: row.get(1)?,
        last_active: millis_to_datetime(row.get(2)?),
    })
}

impl SessionStore for SqliteSessionStore {
    fn create_session(
        &self,
        info: SessionInfo,
        state: ChatState,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let payload = serde_json::to_string(&state)?;
            let id = info.id.to_string();
            let title = info.title.clone();
            let last_active = info.last_active.timestamp_millis();
            let inserted = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let exists = tx
                        .query_row("SELECT 1 FROM sessions WHERE id = ?1", [&id], |_| Ok(()))
                        .optional()?
                        .is_some();
                    if exists {
                        return Ok(false);
                    }
                    tx.execute(
                        "INSERT INTO sessions (id, title, last_active) VALUES (?1, ?2, ?3)",
                        rusqlite::params![id, title, last_active],
                    )?;
                    tx.execute(
                        "INSERT OR REPLACE INTO chat_states (session_id, payload) VALUES (?1, ?2)",
                        rusqlite::params![id, payload],
                    )?;
                    tx.commit()?;
                    Ok(true)
                })
                .await?;

            if inserted {
                Ok(())
            } else {
                Err(StoreError::Duplicate(info.id))
            }
        })
    }

    fn list_sessions(&self) -> StoreFuture<'_, StoreResult<Vec<SessionInfo>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(|conn| {
                    let mut stmt = conn.prepare(
                        "SELECT id, title, last_active FROM sessions
                         ORDER BY last_active DESC, id ASC",
                    )?;
                    let rows = stmt
                        .query_map([], session_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn get_session(&self, id: SessionId) -> StoreFuture<'_, StoreResult<Option<SessionInfo>>> {
        Box::pin(async move {
            let id = id.to_string();
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            "SELECT id, title, last_active FROM sessions WHERE id = ?1",
                            [&id],
                            session_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }

    fn rename_session(&self, id: SessionId, title: String) -> StoreFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let id = id.to_string();
            let changed = self
                .conn
                .call(move |conn| {
                    Ok(conn.execute(
                        "UPDATE sessions SET title = ?1 WHERE id = ?2",
                        rusqlite::params![title, id],
                    )?)
                })
                .await?;
            Ok(changed > 0)
        })
    }

    fn touch_session(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let id = id.to_string();
            let at_ms = at.timestamp_millis();
            let changed = self
                .conn
                .call(move |conn| {
                    Ok(conn.execute(
                        "UPDATE sessions SET last_active = MAX(last_active, ?1) WHERE id = ?2",
                        rusqlite::params![at_ms, id],
                    )?)
                })
                .await?;
            Ok(changed > 0)
        })
    }

    fn delete_session(&self, id: SessionId) -> StoreFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let id = id.to_string();
            let removed = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let removed = tx.execute("DELETE FROM sessions WHERE id = ?1", [&id])?;
                    tx.execute("DELETE FROM chat_states WHERE session_id = ?1", [&id])?;
                    tx.commit()?;
                    Ok(removed)
                })
                .await?;
            Ok(removed > 0)
        })
    }

    fn load_state(&self, id: SessionId) -> StoreFuture<'_, StoreResult<Option<ChatState>>> {
        Box::pin(async move {
            let id = id.to_string();
            let payload: Option<String> = self
                .conn
                .call(move |conn| {
                    let payload = conn
                        .query_row(
                            "SELECT c.payload FROM chat_states c
                             JOIN sessions s ON s.id = c.session_id
                             WHERE c.session_id = ?1",
                            [&id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    Ok(payload)
                })
                .await?;
            payload
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(StoreError::from)
        })
    }

    fn save_state(&self, id: SessionId, state: &ChatState) -> StoreFuture<'_, StoreResult<bool>> {
        let payload = serde_json::to_string(state);
        Box::pin(async move {
            let payload = payload?;
            let id = id.to_string();
            let changed = self
                .conn
                .call(move |conn| {
                    Ok(conn.execute(
                        "UPDATE chat_states SET payload = ?1 WHERE session_id = ?2",
                        rusqlite::params![payload, id],
                    )?)
                })
                .await?;
            Ok(changed > 0)
        })
    }
}
