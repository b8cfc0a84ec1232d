//! Model backend contract consumed by the tool orchestrator.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::tools::ToolSpec;

/// Push side of a stream of text fragments.
///
/// Sends never block; a closed receiver only means nobody is listening.
pub type ChunkSink = mpsc::UnboundedSender<String>;

/// Failures talking to the model backend.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("model backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend answered with a non-success status.
    #[error("model backend returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// The backend answered with something that is not a completion.
    #[error("malformed model backend response: {0}")]
    Malformed(String),
    /// The backend is not reachable or refused the request.
    #[error("model backend unavailable: {0}")]
    Unavailable(String),
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestedToolCall {
    /// Call identifier echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Structured arguments.
    pub arguments: serde_json::Value,
}

/// One entry of the prompt sent to the backend.
#[derive(Clone, Debug, PartialEq)]
pub enum PromptMessage {
    /// Instructions preceding the conversation.
    System(String),
    /// User text.
    User(String),
    /// Assistant text, with the tool calls it requested (if any).
    Assistant {
        /// Text produced in that round.
        content: String,
        /// Calls requested in that round.
        tool_calls: Vec<RequestedToolCall>,
    },
    /// A tool result answering an earlier call.
    Tool {
        /// Identifier of the call being answered.
        call_id: String,
        /// Serialized result.
        content: String,
    },
}

/// Input to a single model round.
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    /// Model identifier.
    pub model: &'a str,
    /// Prompt in conversation order.
    pub messages: &'a [PromptMessage],
    /// Tools the model may call.
    pub tools: &'a [ToolSpec],
}

/// Output of a single model round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    /// Text produced in the round.
    pub content: String,
    /// Tool calls requested in the round; empty for a final answer.
    pub tool_calls: Vec<RequestedToolCall>,
}

impl Completion {
    /// Whether the model asked for more tool work.
    #[must_use]
    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A chat-completion backend with optional incremental delivery.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run one round and return the whole completion.
    ///
    /// # Errors
    /// Returns an [`UpstreamError`] on transport or protocol failure.
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, UpstreamError>;

    /// Run one round, pushing text fragments to `sink` as they are produced.
    ///
    /// The returned completion's `content` equals the concatenation of the
    /// fragments sent. The default implementation sends the whole content as
    /// a single fragment.
    ///
    /// # Errors
    /// Returns an [`UpstreamError`] on transport or protocol failure.
    async fn complete_streaming(
        &self,
        request: CompletionRequest<'_>,
        sink: &ChunkSink,
    ) -> Result<Completion, UpstreamError> {
        let completion = self.complete(request).await?;
        if !completion.content.is_empty() && sink.send(completion.content.clone()).is_err() {
            debug!("Chunk receiver dropped before fragment delivery");
        }
        Ok(completion)
    }
}
