//! Application state shared across all request handlers.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::agent::{AgentDeps, AgentRegistry};
use crate::config::MissionConfig;
use crate::directory::SessionDirectory;
use crate::llm::ModelBackend;
use crate::orchestrator::ToolOrchestrator;
use crate::storage::SessionStore;
use crate::tools::ToolRegistry;

/// Shared application state.
pub struct AppState {
    /// Session catalog.
    pub directory: Arc<SessionDirectory>,
    /// Live per-session agents.
    pub agents: Arc<AgentRegistry>,
    /// Registered tools, for listing.
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    /// Wire the runtime together. Spawns the activity tracker and the idle
    /// agent sweeper, so it must be called inside a tokio runtime.
    #[must_use]
    pub fn assemble(
        config: &MissionConfig,
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn ModelBackend>,
        tools: ToolRegistry,
    ) -> Arc<Self> {
        let tools = Arc::new(tools);
        let orchestrator = Arc::new(ToolOrchestrator::new(
            backend,
            Arc::clone(&tools),
            &config.orchestrator,
        ));
        let (activity, reports) = mpsc::unbounded_channel();
        let default_model = config.backend.default_model.clone();

        let agents = Arc::new(AgentRegistry::new(
            AgentDeps {
                orchestrator,
                store: Arc::clone(&store),
                config: config.agents.clone(),
                activity: Some(activity),
            },
            default_model.clone(),
        ));
        let directory = Arc::new(SessionDirectory::new(
            store,
            Arc::clone(&agents),
            default_model,
        ));
        // Detached; ends when the last agent handle is dropped.
        drop(directory.track_activity(reports));
        // Detached; ends once the registry is dropped.
        drop(agents.spawn_idle_sweeper());

        Arc::new(Self {
            directory,
            agents,
            tools,
        })
    }
}
