//! Shared conversation vocabulary: identifiers, messages, tool calls, states.

pub mod ids;
pub mod message;

pub use ids::{MessageId, SessionId};
pub use message::{ChatState, Message, Role, SessionInfo, ToolCall, ToolCallResult, now_millis};

use thiserror::Error;

/// Errors raised while validating conversation data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// A session identifier failed validation.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

/// Title given to sessions created without one.
pub const DEFAULT_SESSION_TITLE: &str = "New Mission";
