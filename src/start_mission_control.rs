//! Startup helpers for the mission control server.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::config::MissionConfig;
use crate::llm::OpenAiCompatBackend;
use crate::server::{self, AppState};
use crate::storage::{MemorySessionStore, SessionStore, SqliteSessionStore};
use crate::tools::ToolRegistry;

/// Run the server (used by the `mission-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting mission control v{}", env!("CARGO_PKG_VERSION"));

    let config = match MissionConfig::from_env().and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config, shutdown_signal())) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    tracing::info!("Mission control stopped");
    ExitCode::SUCCESS
}

/// Build application state from configuration without starting the server.
///
/// # Errors
/// Returns an error if the store or the model backend cannot be created.
pub async fn initialize(config: &MissionConfig) -> anyhow::Result<Arc<AppState>> {
    let store: Arc<dyn SessionStore> = match &config.storage.sqlite_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using SQLite session store");
            Arc::new(
                SqliteSessionStore::open(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?,
            )
        }
        None => {
            tracing::warn!("No database path configured; sessions are kept in memory only");
            Arc::new(MemorySessionStore::new())
        }
    };

    let backend = OpenAiCompatBackend::new(&config.backend)
        .context("failed to create model backend client")?;
    tracing::info!(
        endpoint = %config.backend.base_url,
        model = %config.backend.default_model,
        "Model backend configured"
    );

    let tools = ToolRegistry::with_builtins(reqwest::Client::new());
    tracing::info!(tools = tools.len(), "Tools registered");

    Ok(AppState::assemble(config, store, Arc::new(backend), tools))
}

/// Initialize state and serve until `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if initialization or the server fails.
pub async fn serve<F>(config: MissionConfig, shutdown_signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = initialize(&config).await?;
    server::run_server_with_shutdown(state, config.server.port, shutdown_signal)
        .await
        .with_context(|| format!("failed to serve on port {}", config.server.port))
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
