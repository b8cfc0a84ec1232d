//! Message, tool-call and session-state records shared by every component.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chat::ids::{MessageId, SessionId};

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Human input.
    User,
    /// Model output.
    Assistant,
}

impl Role {
    /// Stable string form for storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one tool invocation: either `{content}` or `{error}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCallResult {
    /// The tool produced a value.
    Content {
        /// Structured tool output.
        content: serde_json::Value,
    },
    /// The tool failed; the turn continued regardless.
    Error {
        /// Human-readable failure description.
        error: String,
    },
}

impl ToolCallResult {
    /// Whether the invocation failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Text handed back to the model as the tool's answer.
    #[must_use]
    pub fn to_model_text(&self) -> String {
        match self {
            Self::Content { content } => match content {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            },
            Self::Error { error } => serde_json::json!({ "error": error }).to_string(),
        }
    }
}

/// A tool invocation recorded during a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier assigned by the model.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Arguments the model supplied.
    pub arguments: serde_json::Value,
    /// What the tool returned.
    pub result: ToolCallResult,
}

/// One entry of a session history. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Creation time, serialized as Unix milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Tool invocations made while producing this message, in invocation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set when the tool round cap cut the turn short.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Current time truncated to the millisecond precision used on the wire.
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl Message {
    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), Vec::new())
    }

    /// Build an assistant message carrying the turn's tool calls.
    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::new(Role::Assistant, content.into(), tool_calls)
    }

    fn new(role: Role, content: String, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            timestamp: now_millis(),
            tool_calls,
            truncated: false,
        }
    }
}

/// Full conversation state owned by one agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatState {
    /// Append-only history in conversation order.
    pub messages: Vec<Message>,
    /// Model used for the next turn.
    pub model: String,
    /// Whether a turn is in flight.
    pub is_processing: bool,
}

impl ChatState {
    /// Fresh state with an empty history.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            model: model.into(),
            is_processing: false,
        }
    }
}

/// Directory entry describing a session without its payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Display title.
    pub title: String,
    /// Last activity, serialized as Unix milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_active: DateTime<Utc>,
}

impl SessionInfo {
    /// New entry stamped with the current time.
    #[must_use]
    pub fn new(id: SessionId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            last_active: now_millis(),
        }
    }
}
