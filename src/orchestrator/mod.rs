//! Bounded "model → tools → model" loop producing one assistant answer.
//!
//! A turn runs up to `max_rounds` model rounds. Tool calls requested within a
//! round run concurrently; their results are recorded in request order and fed
//! back to the model. Tool failures become `{error}` results and never end the
//! turn. Backend failures end the turn immediately and are not retried here.
//!
//! When the last allowed round still asks for tools, those calls are recorded
//! unexecuted with a cap error and the turn is returned as truncated.
//!
//! Only the final round's text reaches the caller. Text the model writes in a
//! round that also requests tools is fed back to the model and dropped.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::{Message, Role, ToolCall, ToolCallResult};
use crate::config::OrchestratorConfig;
use crate::llm::{ChunkSink, CompletionRequest, ModelBackend, PromptMessage, UpstreamError};
use crate::tools::ToolRegistry;

/// Result of one turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnOutput {
    /// Text of the final round, exactly as streamed when a sink was given.
    pub content: String,
    /// Every tool call of the turn, across rounds, in invocation order.
    pub tool_calls: Vec<ToolCall>,
    /// Set when the round cap ended the turn while the model still wanted tools.
    pub truncated: bool,
}

/// Drives the tool-calling loop against a model backend.
pub struct ToolOrchestrator {
    backend: Arc<dyn ModelBackend>,
    tools: Arc<ToolRegistry>,
    max_rounds: usize,
    system_prompt: Option<String>,
}

impl ToolOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        tools: Arc<ToolRegistry>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            tools,
            max_rounds: config.max_rounds,
            system_prompt: config.system_prompt.clone(),
        }
    }

    /// Registered tools.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one turn for `user_message` on top of `history`.
    ///
    /// With a `sink`, each round's fragments are held until the round ends.
    /// They are released to the sink only when that round is the last one,
    /// so `content` is always the exact concatenation of what was sent.
    ///
    /// # Errors
    /// Returns the backend's [`UpstreamError`] if any round fails.
    pub async fn run_turn(
        &self,
        history: &[Message],
        model: &str,
        user_message: &Message,
        sink: Option<&ChunkSink>,
    ) -> Result<TurnOutput, UpstreamError> {
        let mut prompt = self.build_prompt(history, user_message);
        let specs = self.tools.specs();
        let mut output = TurnOutput::default();

        for round in 1..=self.max_rounds {
            let request = CompletionRequest {
                model,
                messages: &prompt,
                tools: &specs,
            };
            let last_round = round == self.max_rounds;
            let completion = match sink {
                Some(sink) => {
                    let (held, mut fragments) = mpsc::unbounded_channel();
                    let completion = self.backend.complete_streaming(request, &held).await?;
                    if last_round || !completion.requests_tools() {
                        while let Ok(fragment) = fragments.try_recv() {
                            sink.send(fragment).ok();
                        }
                    } else if !completion.content.is_empty() {
                        debug!(model, round, "Dropping text from a tool round");
                    }
                    completion
                }
                None => self.backend.complete(request).await?,
            };

            if !completion.requests_tools() {
                output.content = completion.content;
                info!(
                    model,
                    rounds = round,
                    tool_calls = output.tool_calls.len(),
                    "Turn completed"
                );
                return Ok(output);
            }

            if last_round {
                output.content = completion.content;
                warn!(
                    model,
                    max_rounds = self.max_rounds,
                    skipped = completion.tool_calls.len(),
                    "Tool round cap reached; returning truncated answer"
                );
                let refusal = ToolCallResult::Error {
                    error: format!("tool round cap reached ({} rounds)", self.max_rounds),
                };
                output.tool_calls.extend(completion.tool_calls.into_iter().map(|call| ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                    result: refusal.clone(),
                }));
                output.truncated = true;
                return Ok(output);
            }

            debug!(
                model,
                round,
                requested = completion.tool_calls.len(),
                "Model requested tools"
            );
            let results = join_all(
                completion
                    .tool_calls
                    .iter()
                    .map(|call| self.tools.execute(&call.name, &call.arguments)),
            )
            .await;

            prompt.push(PromptMessage::Assistant {
                content: completion.content,
                tool_calls: completion.tool_calls.clone(),
            });
            for (call, result) in completion.tool_calls.into_iter().zip(results) {
                prompt.push(PromptMessage::Tool {
                    call_id: call.id.clone(),
                    content: result.to_model_text(),
                });
                output.tool_calls.push(ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                    result,
                });
            }
        }

        // Only reachable with `max_rounds == 0`, which config validation rejects.
        output.truncated = true;
        Ok(output)
    }

    fn build_prompt(&self, history: &[Message], user_message: &Message) -> Vec<PromptMessage> {
        let mut prompt = Vec::with_capacity(history.len() + 2);
        if let Some(system) = &self.system_prompt {
            prompt.push(PromptMessage::System(system.clone()));
        }
        for message in history.iter().chain(std::iter::once(user_message)) {
            prompt.push(match message.role {
                Role::User => PromptMessage::User(message.content.clone()),
                Role::Assistant => PromptMessage::Assistant {
                    content: message.content.clone(),
                    tool_calls: Vec::new(),
                },
            });
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{ScriptedBackend, Step};
    use crate::tools::testing::registry;
    use tokio::sync::mpsc;

    fn orchestrator(backend: Arc<ScriptedBackend>, max_rounds: usize) -> ToolOrchestrator {
        ToolOrchestrator::new(
            backend,
            Arc::new(registry()),
            &OrchestratorConfig {
                max_rounds,
                system_prompt: Some("test".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn plain_answer_takes_one_round() {
        let backend = Arc::new(ScriptedBackend::new(vec![Step::answer(&["Hello", " there"])]));
        let output = orchestrator(Arc::clone(&backend), 4)
            .run_turn(&[], "m", &Message::user("hi"), None)
            .await
            .unwrap();
        assert_eq!(output.content, "Hello there");
        assert!(output.tool_calls.is_empty());
        assert!(!output.truncated);
        assert_eq!(backend.rounds(), 1);
    }

    #[tokio::test]
    async fn tool_results_are_fed_back_in_order() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::CallTools(vec![
                ("echo".to_string(), serde_json::json!({ "text": "a" })),
                ("echo".to_string(), serde_json::json!({ "text": "b" })),
            ]),
            Step::answer(&["done"]),
        ]));
        let history = vec![Message::user("earlier"), Message::assistant("ok", Vec::new())];
        let output = orchestrator(Arc::clone(&backend), 4)
            .run_turn(&history, "m", &Message::user("go"), None)
            .await
            .unwrap();

        assert_eq!(output.content, "done");
        let ids: Vec<&str> = output.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["call_1_0", "call_1_1"]);
        assert_eq!(
            output.tool_calls[1].result,
            ToolCallResult::Content {
                content: serde_json::json!({ "echo": "b" })
            }
        );
        // system + 2 history + user, then + assistant + 2 tool results
        assert_eq!(*backend.prompt_lens.lock().unwrap(), vec![4, 7]);
    }

    #[tokio::test]
    async fn tool_failure_does_not_abort_turn() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::call("broken", serde_json::json!({})),
            Step::answer(&["recovered"]),
        ]));
        let output = orchestrator(backend, 4)
            .run_turn(&[], "m", &Message::user("x"), None)
            .await
            .unwrap();
        assert_eq!(output.content, "recovered");
        assert_eq!(output.tool_calls.len(), 1);
        assert!(output.tool_calls[0].result.is_error());
    }

    #[tokio::test]
    async fn round_cap_truncates_endless_tool_loop() {
        let steps = (0..10)
            .map(|_| Step::call("echo", serde_json::json!({ "text": "again" })))
            .collect();
        let backend = Arc::new(ScriptedBackend::new(steps));
        let output = orchestrator(Arc::clone(&backend), 3)
            .run_turn(&[], "m", &Message::user("loop"), None)
            .await
            .unwrap();
        assert!(output.truncated);
        assert_eq!(backend.rounds(), 3);
        assert_eq!(output.tool_calls.len(), 3);
        assert!(!output.tool_calls[1].result.is_error());
        assert_eq!(
            output.tool_calls[2].result,
            ToolCallResult::Error {
                error: "tool round cap reached (3 rounds)".to_string()
            }
        );
    }

    #[tokio::test]
    async fn streaming_matches_non_streaming_content() {
        let script = || {
            vec![
                Step::call("echo", serde_json::json!({ "text": "t" })),
                Step::answer(&["The ", "answer ", "is 42."]),
            ]
        };

        let plain = orchestrator(Arc::new(ScriptedBackend::new(script())), 4)
            .run_turn(&[], "m", &Message::user("q"), None)
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let streamed = orchestrator(Arc::new(ScriptedBackend::new(script())), 4)
            .run_turn(&[], "m", &Message::user("q"), Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["The ", "answer ", "is 42."]);
        assert_eq!(chunks.concat(), streamed.content);
        assert_eq!(plain.content, streamed.content);
    }

    #[tokio::test]
    async fn tool_round_text_is_dropped_in_both_modes() {
        let script = || {
            vec![
                Step::narrate_call("Let me check. ", "echo", serde_json::json!({ "text": "t" })),
                Step::answer(&["Final."]),
            ]
        };

        let plain = orchestrator(Arc::new(ScriptedBackend::new(script())), 4)
            .run_turn(&[], "m", &Message::user("q"), None)
            .await
            .unwrap();
        assert_eq!(plain.content, "Final.");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let streamed = orchestrator(Arc::new(ScriptedBackend::new(script())), 4)
            .run_turn(&[], "m", &Message::user("q"), Some(&tx))
            .await
            .unwrap();
        drop(tx);
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["Final."]);
        assert_eq!(streamed.content, "Final.");
        assert_eq!(streamed.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn capped_turn_keeps_last_round_text() {
        let steps = (0..3)
            .map(|i| Step::narrate_call(&format!("round {i}"), "echo", serde_json::json!({ "text": "x" })))
            .collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let output = orchestrator(Arc::new(ScriptedBackend::new(steps)), 2)
            .run_turn(&[], "m", &Message::user("loop"), Some(&tx))
            .await
            .unwrap();
        drop(tx);
        assert!(output.truncated);
        assert_eq!(output.content, "round 1");
        assert_eq!(rx.recv().await.as_deref(), Some("round 1"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn failed_round_releases_nothing() {
        let backend = Arc::new(ScriptedBackend::new(vec![Step::fail_after(&["half"])]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = orchestrator(backend, 4)
            .run_turn(&[], "m", &Message::user("q"), Some(&tx))
            .await;
        drop(tx);
        assert!(result.is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn backend_failure_surfaces_as_upstream_error() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Step::call("echo", serde_json::json!({ "text": "t" })),
            Step::Fail,
        ]));
        let result = orchestrator(backend, 4)
            .run_turn(&[], "m", &Message::user("q"), None)
            .await;
        assert!(matches!(result, Err(UpstreamError::Unavailable(_))));
    }
}
