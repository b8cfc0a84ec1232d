//! In-process session store used when no database path is configured.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{SessionStore, StoreError, StoreFuture, StoreResult};
use crate::chat::{ChatState, SessionId, SessionInfo};

/// Both halves of a session live in one map entry so they change together.
#[derive(Clone, Debug)]
struct StoredSession {
    info: SessionInfo,
    state: ChatState,
}

/// `DashMap`-backed [`SessionStore`]. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, StoredSession>,
}

impl MemorySessionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(
        &self,
        info: SessionInfo,
        state: ChatState,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            match self.sessions.entry(info.id.clone()) {
                Entry::Occupied(_) => Err(StoreError::Duplicate(info.id)),
                Entry::Vacant(slot) => {
                    slot.insert(StoredSession { info, state });
                    Ok(())
                }
            }
        })
    }

    fn list_sessions(&self) -> StoreFuture<'_, StoreResult<Vec<SessionInfo>>> {
        Box::pin(async move {
            let mut sessions: Vec<SessionInfo> = self
                .sessions
                .iter()
                .map(|entry| entry.value().info.clone())
                .collect();
            sessions.sort_by(|a, b| {
                b.last_active
                    .cmp(&a.last_active)
                    .then_with(|| a.id.cmp(&b.id))
            });
            Ok(sessions)
        })
    }

    fn get_session(&self, id: SessionId) -> StoreFuture<'_, StoreResult<Option<SessionInfo>>> {
        Box::pin(async move { Ok(self.sessions.get(&id).map(|entry| entry.info.clone())) })
    }

    fn rename_session(&self, id: SessionId, title: String) -> StoreFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            Ok(self
                .sessions
                .get_mut(&id)
                .map(|mut entry| entry.info.title = title)
                .is_some())
        })
    }

    fn touch_session(
        &self,
        id: SessionId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let Some(mut entry) = self.sessions.get_mut(&id) else {
                return Ok(false);
            };
            if at > entry.info.last_active {
                entry.info.last_active = at;
            }
            Ok(true)
        })
    }

    fn delete_session(&self, id: SessionId) -> StoreFuture<'_, StoreResult<bool>> {
        Box::pin(async move { Ok(self.sessions.remove(&id).is_some()) })
    }

    fn load_state(&self, id: SessionId) -> StoreFuture<'_, StoreResult<Option<ChatState>>> {
        Box::pin(async move { Ok(self.sessions.get(&id).map(|entry| entry.state.clone())) })
    }

    fn save_state(&self, id: SessionId, state: &ChatState) -> StoreFuture<'_, StoreResult<bool>> {
        let state = state.clone();
        Box::pin(async move {
            Ok(self
                .sessions
                .get_mut(&id)
                .map(|mut entry| entry.state = state)
                .is_some())
        })
    }
}
