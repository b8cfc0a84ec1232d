//! Runtime configuration for the mission control service.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::llm::models::{DEFAULT_MODEL, find_model};

/// Environment variable overriding the HTTP port.
pub const PORT_ENV: &str = "MISSION_PORT";
/// Environment variable overriding the model gateway base URL.
pub const BACKEND_URL_ENV: &str = "MISSION_BACKEND_URL";
/// Environment variable holding the gateway API key.
pub const API_KEY_ENV: &str = "MISSION_API_KEY";
/// Environment variable overriding the default model.
pub const MODEL_ENV: &str = "MISSION_MODEL";
/// Environment variable overriding the tool round cap.
pub const MAX_ROUNDS_ENV: &str = "MISSION_MAX_ROUNDS";
/// Environment variable selecting the `SQLite` database file.
pub const DB_PATH_ENV: &str = "MISSION_DB_PATH";
/// Environment variable overriding the per-session turn queue limit.
pub const MAX_QUEUED_TURNS_ENV: &str = "MISSION_MAX_QUEUED_TURNS";
/// Environment variable overriding the idle agent timeout, in seconds.
pub const AGENT_IDLE_SECS_ENV: &str = "MISSION_AGENT_IDLE_SECS";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The backend URL does not parse.
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MissionConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Model gateway settings.
    pub backend: BackendConfig,
    /// Tool loop settings.
    pub orchestrator: OrchestratorConfig,
    /// Per-session agent settings.
    pub agents: AgentConfig,
    /// Persistence settings.
    pub storage: StorageConfig,
}

impl MissionConfig {
    /// Defaults overlaid with `MISSION_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>(PORT_ENV)? {
            config.server.port = port;
        }
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            config.backend.base_url = url;
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.backend.api_key = Some(key);
        }
        if let Ok(model) = std::env::var(MODEL_ENV) {
            config.backend.default_model = model;
        }
        if let Some(rounds) = env_parse::<usize>(MAX_ROUNDS_ENV)? {
            config.orchestrator.max_rounds = rounds;
        }
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            config.storage.sqlite_path = Some(PathBuf::from(path));
        }
        if let Some(limit) = env_parse::<usize>(MAX_QUEUED_TURNS_ENV)? {
            config.agents.max_queued_turns = limit;
        }
        if let Some(secs) = env_parse::<u64>(AGENT_IDLE_SECS_ENV)? {
            config.agents.idle_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be > 0".to_string()));
        }

        Url::parse(&self.backend.base_url)?;

        if find_model(&self.backend.default_model).is_none() {
            return Err(ConfigError::Invalid(format!(
                "backend.default_model {} is not in the model catalog",
                self.backend.default_model
            )));
        }

        if self.orchestrator.max_rounds == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_rounds must be > 0".to_string(),
            ));
        }

        if self.agents.max_queued_turns == 0 {
            return Err(ConfigError::Invalid(
                "agents.max_queued_turns must be > 0".to_string(),
            ));
        }

        if self.agents.stream_buffer == 0 {
            return Err(ConfigError::Invalid(
                "agents.stream_buffer must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{name} is not a valid number: {raw}"))),
        Err(_) => Ok(None),
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port bound on all interfaces.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Model gateway settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of an OpenAI-compatible chat-completions API.
    pub base_url: String,
    /// Bearer token, if the gateway needs one.
    pub api_key: Option<String>,
    /// Model for newly created sessions.
    pub default_model: String,
    /// Whole-request timeout.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787/v1".to_string(),
            api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Tool loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum model rounds per turn.
    pub max_rounds: usize,
    /// Optional system prompt prepended to every round.
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 8,
            system_prompt: Some(
                "You are a helpful assistant. Use the available tools when they help answer the user."
                    .to_string(),
            ),
        }
    }
}

/// Per-session agent settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Turns allowed to wait behind the in-flight one before `Busy` is returned.
    pub max_queued_turns: usize,
    /// Chunks buffered between a streaming turn and its HTTP response.
    pub stream_buffer: usize,
    /// Live agents with no work for this long are evicted; zero keeps them
    /// until their session is deleted.
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_queued_turns: 16,
            stream_buffer: 64,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Persistence settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` file; in-memory storage when absent.
    pub sqlite_path: Option<PathBuf>,
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
