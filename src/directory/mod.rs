//! Catalog of sessions ("missions").
//!
//! The directory owns [`SessionInfo`] entries. Creating or deleting a session
//! goes through the store in one step for both the entry and its chat state;
//! deletion also evicts the live agent, serialized against agent loads by the
//! [`AgentRegistry`].

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{Activity, AgentRegistry};
use crate::chat::{ChatState, DEFAULT_SESSION_TITLE, SessionId, SessionInfo};
use crate::storage::{SessionStore, StoreError};

/// Longest accepted title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Directory failures.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// A session with this id already exists.
    #[error("session already exists: {0}")]
    DuplicateSession(SessionId),
    /// No session with this id.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    /// Title was blank or too long.
    #[error("invalid title: {0}")]
    InvalidTitle(String),
    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for DirectoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(id) => Self::DuplicateSession(id),
            StoreError::Missing(id) => Self::UnknownSession(id),
            other => Self::Storage(other),
        }
    }
}

/// Session catalog over a [`SessionStore`].
pub struct SessionDirectory {
    store: Arc<dyn SessionStore>,
    agents: Arc<AgentRegistry>,
    default_model: String,
}

impl SessionDirectory {
    /// Create a directory.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        agents: Arc<AgentRegistry>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            agents,
            default_model: default_model.into(),
        }
    }

    /// All sessions, most recently active first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn list(&self) -> Result<Vec<SessionInfo>, DirectoryError> {
        Ok(self.store.list_sessions().await?)
    }

    /// Create a session with an empty history.
    ///
    /// A blank or missing title becomes `"New Mission"`; a missing id is
    /// generated.
    ///
    /// # Errors
    /// `DuplicateSession` when `id` is taken, `InvalidTitle` when too long.
    pub async fn create(
        &self,
        title: Option<&str>,
        id: Option<SessionId>,
    ) -> Result<SessionInfo, DirectoryError> {
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => checked_title(title)?,
            None => DEFAULT_SESSION_TITLE.to_string(),
        };
        let info = SessionInfo::new(id.unwrap_or_else(SessionId::generate), title);
        self.store
            .create_session(info.clone(), ChatState::new(self.default_model.clone()))
            .await?;
        info!(session_id = %info.id, title = %info.title, "Session created");
        Ok(info)
    }

    /// Change a session's title. Returns `false` when the session does not
    /// exist; nothing is created in that case.
    ///
    /// # Errors
    /// `InvalidTitle` for blank or oversized titles, or a storage failure.
    pub async fn rename(&self, id: &SessionId, title: &str) -> Result<bool, DirectoryError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DirectoryError::InvalidTitle("title must not be empty".to_string()));
        }
        let title = checked_title(title)?;
        let renamed = self.store.rename_session(id.clone(), title.clone()).await?;
        if renamed {
            info!(session_id = %id, title = %title, "Session renamed");
        } else {
            debug!(session_id = %id, "Rename of unknown session ignored");
        }
        Ok(renamed)
    }

    /// Delete a session and its state, and evict its agent. Returns whether
    /// the session existed.
    ///
    /// # Errors
    /// Returns an error if storage access fails; nothing is evicted then.
    pub async fn delete(&self, id: &SessionId) -> Result<bool, DirectoryError> {
        let existed = self.agents.delete_session(id).await?;
        if existed {
            info!(session_id = %id, "Session deleted");
        }
        Ok(existed)
    }

    /// Record activity on a session. Returns whether the session exists.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn touch(&self, activity: Activity) -> Result<bool, DirectoryError> {
        Ok(self
            .store
            .touch_session(activity.session_id, activity.at)
            .await?)
    }

    /// Apply agent activity reports until every sender is gone.
    ///
    /// The task holds only the store, so it never keeps the agents (and
    /// with them the senders) alive.
    #[must_use]
    pub fn track_activity(
        &self,
        mut reports: mpsc::UnboundedReceiver<Activity>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            while let Some(activity) = reports.recv().await {
                let session_id = activity.session_id.clone();
                match store.touch_session(activity.session_id, activity.at).await {
                    Ok(true) => debug!(session_id = %session_id, "Session activity recorded"),
                    Ok(false) => debug!(session_id = %session_id, "Activity for deleted session"),
                    Err(err) => warn!(session_id = %session_id, error = %err, "Failed to record activity"),
                }
            }
        })
    }
}

fn checked_title(title: &str) -> Result<String, DirectoryError> {
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(DirectoryError::InvalidTitle(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}
