//! In-process registry of live agents, keyed by session id.
//!
//! Materialising an agent (load, then insert) and deleting a session (store
//! delete, then evict) are serialized by one lifecycle lock: loads share it,
//! deletes take it exclusively. A load can therefore never insert an agent
//! for a session whose rows were removed while it was reading them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{ActivitySender, ConversationAgent};
use crate::chat::{ChatState, DEFAULT_SESSION_TITLE, SessionId, SessionInfo};
use crate::config::AgentConfig;
use crate::orchestrator::ToolOrchestrator;
use crate::storage::{SessionStore, StoreError, StoreResult};

/// Shortest pause between idle sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Everything an agent needs besides its own state.
#[derive(Clone)]
pub struct AgentDeps {
    /// Shared tool loop.
    pub orchestrator: Arc<ToolOrchestrator>,
    /// Where state is persisted.
    pub store: Arc<dyn SessionStore>,
    /// Queue, stream and idle settings.
    pub config: AgentConfig,
    /// Where finished turns are reported.
    pub activity: Option<ActivitySender>,
}

/// Lazily materialised agents. At most one agent exists per session id.
pub struct AgentRegistry {
    agents: DashMap<SessionId, Arc<ConversationAgent>>,
    lifecycle: RwLock<()>,
    deps: AgentDeps,
    default_model: String,
}

impl AgentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new(deps: AgentDeps, default_model: impl Into<String>) -> Self {
        Self {
            agents: DashMap::new(),
            lifecycle: RwLock::new(()),
            deps,
            default_model: default_model.into(),
        }
    }

    /// Agent for an existing session, loading it from the store on first use.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn get(&self, id: &SessionId) -> StoreResult<Option<Arc<ConversationAgent>>> {
        if let Some(agent) = self.live(id) {
            return Ok(Some(agent));
        }
        let _loading = self.lifecycle.read().await;
        if let Some(agent) = self.live(id) {
            return Ok(Some(agent));
        }
        let Some(state) = self.deps.store.load_state(id.clone()).await? else {
            return Ok(None);
        };
        Ok(Some(self.insert(id, state)))
    }

    /// Agent for a session, creating the session with the default title and
    /// model when it does not exist yet.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn get_or_create(&self, id: &SessionId) -> StoreResult<Arc<ConversationAgent>> {
        if let Some(agent) = self.live(id) {
            return Ok(agent);
        }
        let _loading = self.lifecycle.read().await;
        if let Some(agent) = self.live(id) {
            return Ok(agent);
        }
        if let Some(state) = self.deps.store.load_state(id.clone()).await? {
            return Ok(self.insert(id, state));
        }

        let info = SessionInfo::new(id.clone(), DEFAULT_SESSION_TITLE);
        let fresh = ChatState::new(self.default_model.clone());
        let state = match self.deps.store.create_session(info, fresh.clone()).await {
            Ok(()) => {
                info!(session_id = %id, "Session created on first use");
                fresh
            }
            // Lost a race with another creator; theirs is just as good.
            Err(StoreError::Duplicate(_)) => self
                .deps
                .store
                .load_state(id.clone())
                .await?
                .ok_or_else(|| StoreError::Missing(id.clone()))?,
            Err(err) => return Err(err),
        };
        Ok(self.insert(id, state))
    }

    /// Delete a session from the store and evict its agent as one step with
    /// respect to materialisation. Returns whether the session existed.
    ///
    /// # Errors
    /// Returns an error if the store delete fails; nothing is evicted then.
    pub async fn delete_session(&self, id: &SessionId) -> StoreResult<bool> {
        let _deleting = self.lifecycle.write().await;
        let existed = self.deps.store.delete_session(id.clone()).await?;
        self.evict(id);
        Ok(existed)
    }

    /// Drop the live agent for a session. Its worker exits once the last
    /// in-flight handle is released.
    pub fn evict(&self, id: &SessionId) -> bool {
        let evicted = self.agents.remove(id).is_some();
        if evicted {
            debug!(session_id = %id, "Agent evicted");
        }
        evicted
    }

    /// Evict agents nobody holds that have had no work for `idle_timeout`.
    /// Returns how many were evicted.
    pub fn evict_idle(&self) -> usize {
        let idle_timeout = self.deps.config.idle_timeout;
        let before = self.agents.len();
        self.agents.retain(|id, agent| {
            let idle = Arc::strong_count(agent) == 1
                && agent.idle_for().is_some_and(|idle| idle >= idle_timeout);
            if idle {
                debug!(session_id = %id, "Idle agent evicted");
            }
            !idle
        });
        before.saturating_sub(self.agents.len())
    }

    /// Run [`Self::evict_idle`] periodically until the registry is dropped.
    /// Returns `None` when idle eviction is disabled (`idle_timeout` of zero).
    #[must_use]
    pub fn spawn_idle_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let idle_timeout = self.deps.config.idle_timeout;
        if idle_timeout.is_zero() {
            info!("Idle agent eviction is disabled");
            return None;
        }
        let interval = (idle_timeout / 2).max(MIN_SWEEP_INTERVAL);
        let registry: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.evict_idle();
                if evicted > 0 {
                    info!(evicted, live = registry.len(), "Idle agents evicted");
                }
            }
        }))
    }

    /// Number of live agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn live(&self, id: &SessionId) -> Option<Arc<ConversationAgent>> {
        self.agents.get(id).map(|agent| {
            agent.touch();
            Arc::clone(agent.value())
        })
    }

    fn insert(&self, id: &SessionId, state: ChatState) -> Arc<ConversationAgent> {
        let agent = self
            .agents
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(session_id = %id, "Agent materialised");
                Arc::new(ConversationAgent::spawn(id.clone(), state, &self.deps))
            });
        Arc::clone(agent.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use crate::config::OrchestratorConfig;
    use crate::llm::testing::ScriptedBackend;
    use crate::storage::{MemorySessionStore, StoreFuture};
    use crate::tools::ToolRegistry;

    /// Store whose state loads take a while, to widen load/delete races.
    struct SlowLoadStore {
        inner: MemorySessionStore,
        delay: Duration,
    }

    impl SessionStore for SlowLoadStore {
        fn create_session(
            &self,
            info: SessionInfo,
            state: ChatState,
        ) -> StoreFuture<'_, StoreResult<()>> {
            self.inner.create_session(info, state)
        }

        fn list_sessions(&self) -> StoreFuture<'_, StoreResult<Vec<SessionInfo>>> {
            self.inner.list_sessions()
        }

        fn get_session(&self, id: SessionId) -> StoreFuture<'_, StoreResult<Option<SessionInfo>>> {
            self.inner.get_session(id)
        }

        fn rename_session(&self, id: SessionId, title: String) -> StoreFuture<'_, StoreResult<bool>> {
            self.inner.rename_session(id, title)
        }

        fn touch_session(
            &self,
            id: SessionId,
            at: chrono::DateTime<chrono::Utc>,
        ) -> StoreFuture<'_, StoreResult<bool>> {
            self.inner.touch_session(id, at)
        }

        fn delete_session(&self, id: SessionId) -> StoreFuture<'_, StoreResult<bool>> {
            self.inner.delete_session(id)
        }

        fn load_state(&self, id: SessionId) -> StoreFuture<'_, StoreResult<Option<ChatState>>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.inner.load_state(id).await
            })
        }

        fn save_state(&self, id: SessionId, state: &ChatState) -> StoreFuture<'_, StoreResult<bool>> {
            self.inner.save_state(id, state)
        }
    }

    fn registry_over(
        store: Arc<dyn SessionStore>,
        backend: ScriptedBackend,
        config: AgentConfig,
    ) -> AgentRegistry {
        let deps = AgentDeps {
            orchestrator: Arc::new(ToolOrchestrator::new(
                Arc::new(backend),
                Arc::new(ToolRegistry::new()),
                &OrchestratorConfig::default(),
            )),
            store,
            config,
            activity: None,
        };
        AgentRegistry::new(deps, "model-x")
    }

    fn registry(store: Arc<MemorySessionStore>) -> AgentRegistry {
        registry_over(store, ScriptedBackend::default(), AgentConfig::default())
    }

    async fn slow_registry(id: &SessionId) -> (Arc<AgentRegistry>, Arc<SlowLoadStore>) {
        let store = Arc::new(SlowLoadStore {
            inner: MemorySessionStore::new(),
            delay: Duration::from_millis(100),
        });
        store
            .create_session(SessionInfo::new(id.clone(), "Racy"), ChatState::new("model-x"))
            .await
            .unwrap();
        let agents = Arc::new(registry_over(
            Arc::clone(&store) as _,
            ScriptedBackend::default(),
            AgentConfig::default(),
        ));
        (agents, store)
    }

    #[tokio::test]
    async fn unknown_session_is_not_materialised_by_get() {
        let store = Arc::new(MemorySessionStore::new());
        let agents = registry(Arc::clone(&store));
        let id = SessionId::parse("nobody").unwrap();
        assert!(agents.get(&id).await.unwrap().is_none());
        assert!(agents.is_empty());
        assert!(store.get_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_create_materialises_once() {
        let store = Arc::new(MemorySessionStore::new());
        let agents = registry(Arc::clone(&store));
        let id = SessionId::parse("fresh").unwrap();

        let first = agents.get_or_create(&id).await.unwrap();
        let second = agents.get_or_create(&id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(agents.len(), 1);

        let info = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(info.title, DEFAULT_SESSION_TITLE);
        assert_eq!(first.state().await.model, "model-x");
    }

    #[tokio::test]
    async fn evicted_agent_reloads_persisted_state() {
        let store = Arc::new(MemorySessionStore::new());
        let agents = registry(Arc::clone(&store));
        let id = SessionId::parse("reload").unwrap();

        let agent = agents.get_or_create(&id).await.unwrap();
        agent.send_message("hello", None).await.unwrap();
        assert!(agents.evict(&id));
        assert!(!agents.evict(&id));

        let reloaded = agents.get(&id).await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&agent, &reloaded));
        assert_eq!(reloaded.state().await.messages.len(), 2);
    }

    #[tokio::test]
    async fn delete_during_load_leaves_no_agent() {
        let id = SessionId::parse("racy").unwrap();
        let (agents, store) = slow_registry(&id).await;

        let loading = tokio::spawn({
            let agents = Arc::clone(&agents);
            let id = id.clone();
            async move { agents.get(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(agents.delete_session(&id).await.unwrap());

        let loaded = loading.await.unwrap().unwrap();
        assert!(agents.is_empty());
        assert!(agents.get(&id).await.unwrap().is_none());
        assert!(store.get_session(id.clone()).await.unwrap().is_none());
        if let Some(stale) = loaded {
            assert!(matches!(
                stale.send_message("late", None).await,
                Err(AgentError::SessionGone(_))
            ));
        }
        assert!(store.load_state(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_create_racing_delete_keeps_no_stale_state() {
        let id = SessionId::parse("racy").unwrap();
        let (agents, store) = slow_registry(&id).await;
        store
            .save_state(id.clone(), &{
                let mut state = ChatState::new("model-x");
                state.messages.push(crate::chat::Message::user("old"));
                state
            })
            .await
            .unwrap();

        let loading = tokio::spawn({
            let agents = Arc::clone(&agents);
            let id = id.clone();
            async move { agents.get_or_create(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(agents.delete_session(&id).await.unwrap());
        loading.await.unwrap().unwrap();

        assert!(agents.is_empty());
        assert!(store.get_session(id.clone()).await.unwrap().is_none());
        let revived = agents.get_or_create(&id).await.unwrap();
        assert!(revived.state().await.messages.is_empty());
    }

    #[tokio::test]
    async fn concurrent_turns_racing_delete_leave_nothing_behind() {
        let store = Arc::new(MemorySessionStore::new());
        let agents = registry_over(
            Arc::clone(&store) as _,
            ScriptedBackend::default().with_delay(Duration::from_millis(50)),
            AgentConfig::default(),
        );
        let id = SessionId::parse("doomed").unwrap();
        let agent = agents.get_or_create(&id).await.unwrap();

        let first = agent.send_message("one", None);
        let second = agent.send_message("two", None);
        let delete = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            agents.delete_session(&id).await
        };
        let (first, second, deleted) = tokio::join!(first, second, delete);

        assert!(deleted.unwrap());
        for outcome in [first, second] {
            assert!(matches!(outcome, Ok(_) | Err(AgentError::SessionGone(_))));
        }
        assert!(agents.is_empty());
        assert!(agents.get(&id).await.unwrap().is_none());
        assert!(store.load_state(id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_agents_are_evicted_only_when_unheld() {
        let store = Arc::new(MemorySessionStore::new());
        let agents = registry_over(
            Arc::clone(&store) as _,
            ScriptedBackend::default(),
            AgentConfig {
                idle_timeout: Duration::from_secs(60),
                ..AgentConfig::default()
            },
        );
        let id = SessionId::parse("sleepy").unwrap();
        let agent = agents.get_or_create(&id).await.unwrap();
        agent.send_message("hello", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(agents.evict_idle(), 0);
        drop(agent);
        assert_eq!(agents.evict_idle(), 1);
        assert!(agents.is_empty());

        let reloaded = agents.get(&id).await.unwrap().unwrap();
        assert_eq!(reloaded.state().await.messages.len(), 2);
        assert_eq!(agents.evict_idle(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_in_background() {
        let agents = Arc::new(registry_over(
            Arc::new(MemorySessionStore::new()),
            ScriptedBackend::default(),
            AgentConfig {
                idle_timeout: Duration::from_secs(10),
                ..AgentConfig::default()
            },
        ));
        let id = SessionId::parse("swept").unwrap();
        drop(agents.get_or_create(&id).await.unwrap());
        let sweeper = agents.spawn_idle_sweeper().unwrap();

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(agents.is_empty());
        drop(agents);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(sweeper.is_finished());
    }
}
