//! Client for OpenAI-compatible chat-completions gateways.
//!
//! Behaviour:
//! - `POST {base_url}/chat/completions` with function-calling tool specs.
//! - Streaming uses server-sent events: `data: {json}` lines, terminated by
//!   `data: [DONE]`. Tool-call deltas arrive in pieces keyed by `index`.
//! - A stream that closes without `[DONE]` yields whatever was received.
//! - No retries here: a failed round fails the turn.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::{
    ChunkSink, Completion, CompletionRequest, ModelBackend, PromptMessage, RequestedToolCall,
    UpstreamError,
};
use crate::config::BackendConfig;
use crate::tools::ToolSpec;

/// Longest error body kept in [`UpstreamError::Status`].
const MAX_ERROR_BODY: usize = 2_048;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall<'a>,
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCallDelta>,
}

#[derive(Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Chat-completions client.
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiCompatBackend {
    /// Build a client from configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }

    async fn post(
        &self,
        request: CompletionRequest<'_>,
        stream: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let body = build_request(request, stream);
        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Completion, UpstreamError> {
        let response: ChatResponse = self.post(request, false).await?.json().await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::Malformed("response has no choices".to_string()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|call| RequestedToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: parse_arguments(&call.function.arguments),
                })
                .collect(),
        })
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest<'_>,
        sink: &ChunkSink,
    ) -> Result<Completion, UpstreamError> {
        let response = self.post(request, true).await?;
        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut accumulator = StreamAccumulator::default();

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for payload in decoder.push(&chunk) {
                if accumulator.apply(&payload, sink)? {
                    break 'read;
                }
            }
        }

        if !accumulator.done {
            warn!("Model stream closed before [DONE]; keeping partial completion");
        }
        Ok(accumulator.finish())
    }
}

fn build_request<'a>(request: CompletionRequest<'a>, stream: bool) -> ChatRequest<'a> {
    let messages = request
        .messages
        .iter()
        .map(|message| match message {
            PromptMessage::System(text) => WireMessage {
                role: "system",
                content: Some(text.as_str()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
            PromptMessage::User(text) => WireMessage {
                role: "user",
                content: Some(text.as_str()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            },
            PromptMessage::Assistant {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant",
                content: (!content.is_empty() || tool_calls.is_empty()).then_some(content.as_str()),
                tool_calls: tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: &call.id,
                        kind: "function",
                        function: WireFunctionCall {
                            name: &call.name,
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect(),
                tool_call_id: None,
            },
            PromptMessage::Tool { call_id, content } => WireMessage {
                role: "tool",
                content: Some(content.as_str()),
                tool_calls: Vec::new(),
                tool_call_id: Some(call_id.as_str()),
            },
        })
        .collect();

    ChatRequest {
        model: request.model,
        messages,
        tools: request.tools.iter().map(wire_tool).collect(),
        stream,
    }
}

fn wire_tool(spec: &ToolSpec) -> WireTool<'_> {
    WireTool {
        kind: "function",
        function: WireFunction {
            name: &spec.name,
            description: &spec.description,
            parameters: &spec.parameters,
        },
    }
}

/// Parse a tool-call argument string; unparsable input is kept as a string.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Splits a byte stream into SSE `data:` payloads.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes; returns every complete `data:` payload.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds streamed deltas into a completion.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    done: bool,
}

impl StreamAccumulator {
    /// Apply one payload; returns `true` once the stream is finished.
    fn apply(&mut self, payload: &str, sink: &ChunkSink) -> Result<bool, UpstreamError> {
        if payload == "[DONE]" {
            self.done = true;
            return Ok(true);
        }

        let chunk: StreamChunk = serde_json::from_str(payload)
            .map_err(|err| UpstreamError::Malformed(format!("bad stream chunk: {err}")))?;

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|text| !text.is_empty()) {
                self.content.push_str(&text);
                if sink.send(text).is_err() {
                    debug!("Chunk receiver dropped; continuing to accumulate");
                }
            }
            for delta in choice.delta.tool_calls {
                let entry = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }

        Ok(false)
    }

    fn finish(self) -> Completion {
        Completion {
            content: self.content,
            tool_calls: self
                .tool_calls
                .into_values()
                .filter(|call| !call.name.is_empty())
                .map(|call| RequestedToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: parse_arguments(&call.arguments),
                })
                .collect(),
        }
    }
}
