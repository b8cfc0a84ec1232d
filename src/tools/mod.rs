//! Tool registry consumed by the orchestrator.
//!
//! Each tool describes itself statically (name, description, JSON schema of its
//! parameters) and exposes a single `execute` call. The orchestrator only sees
//! this contract; tool internals stay behind the trait.

pub mod weather;
pub mod web_search;

pub use weather::WeatherTool;
pub use web_search::WebSearchTool;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chat::ToolCallResult;

/// Errors produced by tool executors. Always captured into a tool result.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("unknown tool: {0}")]
    Unknown(String),
    /// The arguments do not match the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// An HTTP call made by the tool failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The tool ran but could not produce a result.
    #[error("{0}")]
    Failed(String),
    /// The tool task panicked or was cancelled.
    #[error("tool aborted: {0}")]
    Aborted(String),
}

/// Static description of a tool, as advertised to the model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Tool listing entry returned to clients.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSummary {
    /// Stable identifier (the tool name).
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Whether the tool is offered to the model.
    pub enabled: bool,
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static description; must not change over the tool's lifetime.
    fn spec(&self) -> ToolSpec;

    /// Run the tool. Arguments are read-only input.
    ///
    /// # Errors
    /// Returns a [`ToolError`] when the tool cannot produce a result.
    async fn execute(&self, arguments: &serde_json::Value)
    -> Result<serde_json::Value, ToolError>;
}

/// Read-mostly set of tools, built once at startup.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<(ToolSpec, Arc<dyn Tool>)>,
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in network tools.
    #[must_use]
    pub fn with_builtins(client: reqwest::Client) -> Self {
        Self::new()
            .with_tool(Arc::new(WeatherTool::new(client.clone())))
            .with_tool(Arc::new(WebSearchTool::new(client)))
    }

    /// Add a tool, replacing any tool registered under the same name.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        let spec = tool.spec();
        self.tools.retain(|(existing, _)| existing.name != spec.name);
        self.tools.push((spec, tool));
        self
    }

    /// Specs of every registered tool, in registration order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|(spec, _)| spec.clone()).collect()
    }

    /// Client-facing listing.
    #[must_use]
    pub fn summaries(&self) -> Vec<ToolSummary> {
        self.tools
            .iter()
            .map(|(spec, _)| ToolSummary {
                id: spec.name.clone(),
                name: spec.name.clone(),
                description: spec.description.clone(),
                enabled: true,
            })
            .collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name, capturing every failure into the result.
    ///
    /// The tool runs on its own task so a panicking executor cannot take the
    /// turn down with it.
    pub async fn execute(&self, name: &str, arguments: &serde_json::Value) -> ToolCallResult {
        let Some(tool) = self
            .tools
            .iter()
            .find(|(spec, _)| spec.name == name)
            .map(|(_, tool)| Arc::clone(tool))
        else {
            warn!(tool = name, "Model requested an unregistered tool");
            return ToolCallResult::Error {
                error: ToolError::Unknown(name.to_string()).to_string(),
            };
        };

        let arguments = arguments.clone();
        let outcome = tokio::spawn(async move { tool.execute(&arguments).await })
            .await
            .unwrap_or_else(|join_err| Err(ToolError::Aborted(join_err.to_string())));

        match outcome {
            Ok(content) => {
                debug!(tool = name, "Tool executed");
                ToolCallResult::Content { content }
            }
            Err(err) => {
                warn!(tool = name, error = %err, "Tool execution failed");
                ToolCallResult::Error {
                    error: err.to_string(),
                }
            }
        }
    }
}

/// Read a required string argument.
pub(crate) fn required_str<'a>(
    arguments: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string field `{key}`")))
}


#[cfg(test)]
mod tests {
    use super::testing::registry;
    use super::*;

    #[tokio::test]
    async fn executes_registered_tool() {
        let result = registry()
            .execute("echo", &serde_json::json!({ "text": "ping" }))
            .await;
        assert_eq!(
            result,
            ToolCallResult::Content {
                content: serde_json::json!({ "echo": "ping" })
            }
        );
    }

    #[tokio::test]
    async fn failures_are_captured_not_raised() {
        let registry = registry();
        let failed = registry.execute("broken", &serde_json::json!({})).await;
        assert_eq!(
            failed,
            ToolCallResult::Error {
                error: "sensor offline".to_string()
            }
        );

        let bad_args = registry.execute("echo", &serde_json::json!({})).await;
        assert!(bad_args.is_error());

        let unknown = registry.execute("nope", &serde_json::json!({})).await;
        assert_eq!(
            unknown,
            ToolCallResult::Error {
                error: "unknown tool: nope".to_string()
            }
        );
    }

    #[tokio::test]
    async fn panicking_tool_becomes_error_result() {
        let result = registry().execute("panics", &serde_json::json!({})).await;
        assert!(matches!(result, ToolCallResult::Error { error } if error.starts_with("tool aborted")));
    }

    #[test]
    fn registering_same_name_replaces() {
        let registry = ToolRegistry::new()
            .with_tool(Arc::new(testing::EchoTool))
            .with_tool(Arc::new(testing::EchoTool));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.summaries()[0].id, "echo");
    }

    #[test]
    fn builtins_advertise_schemas() {
        let registry = ToolRegistry::with_builtins(reqwest::Client::new());
        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["get_weather".to_string(), "web_search".to_string()]);
        assert!(registry.specs().iter().all(|s| s.parameters["type"] == "object"));
    }
}
