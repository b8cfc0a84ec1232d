//! Durable session directory and chat state persistence.
//!
//! A session always exists as a pair: its [`SessionInfo`] entry and its
//! [`ChatState`]. Stores create and delete both halves atomically, and
//! [`SessionStore::save_state`] never creates a missing session, so a turn
//! finishing after a delete cannot resurrect it.

pub mod memory;
pub mod sqlite;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::chat::{ChatState, SessionId, SessionInfo};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A session with this identifier already exists.
    #[error("session already exists: {0}")]
    Duplicate(SessionId),
    /// The session disappeared between two steps of one operation.
    #[error("session vanished: {0}")]
    Missing(SessionId),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Stored payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for the session directory and per-session chat state.
pub trait SessionStore: Send + Sync {
    /// Insert a new session with its initial state.
    ///
    /// # Errors
    /// [`StoreError::Duplicate`] if the id is taken, or a storage failure.
    fn create_session(
        &self,
        info: SessionInfo,
        state: ChatState,
    ) -> StoreFuture<'_, StoreResult<()>>;

    /// All sessions, most recently active first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_sessions(&self) -> StoreFuture<'_, StoreResult<Vec<SessionInfo>>>;

    /// One directory entry.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_session(&self, id: SessionId) -> StoreFuture<'_, StoreResult<Option<SessionInfo>>>;

    /// Change a title. Returns `false` when the session does not exist.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn rename_session(&self, id: SessionId, title: String) -> StoreFuture<'_, StoreResult<bool>>;

    /// Move `lastActive` forward to `at`. Older timestamps are ignored.
    /// Returns `false` when the session does not exist.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn touch_session(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, StoreResult<bool>>;

    /// Remove the entry and its state together. Returns `false` when absent.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_session(&self, id: SessionId) -> StoreFuture<'_, StoreResult<bool>>;

    /// Load a session's chat state.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the payload is corrupt.
    fn load_state(&self, id: SessionId) -> StoreFuture<'_, StoreResult<Option<ChatState>>>;

    /// Overwrite an existing session's chat state. Returns `false` when the
    /// session no longer exists; nothing is written in that case.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn save_state(&self, id: SessionId, state: &ChatState) -> StoreFuture<'_, StoreResult<bool>>;
}
