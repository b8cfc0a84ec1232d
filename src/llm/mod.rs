//! Model backend contract, model catalog, and the HTTP gateway client.

pub mod backend;
pub mod models;
pub mod openai_compat;

pub use backend::{
    ChunkSink, Completion, CompletionRequest, ModelBackend, PromptMessage, RequestedToolCall,
    UpstreamError,
};
pub use models::{DEFAULT_MODEL, MODELS, ModelInfo};
pub use openai_compat::OpenAiCompatBackend;

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backends for orchestrator and agent tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    /// One scripted round.
    #[derive(Clone, Debug)]
    pub enum Step {
        /// Final answer delivered in the given fragments.
        Answer(Vec<String>),
        /// Request tool calls (`name`, JSON arguments) in one round.
        CallTools(Vec<(String, serde_json::Value)>),
        /// Stream some text, then request tool calls in the same round.
        NarrateTools(String, Vec<(String, serde_json::Value)>),
        /// Fail before producing anything.
        Fail,
        /// Emit fragments, then fail.
        FailAfter(Vec<String>),
    }

    impl Step {
        pub fn answer(fragments: &[&str]) -> Self {
            Self::Answer(fragments.iter().map(|f| (*f).to_string()).collect())
        }

        pub fn call(name: &str, arguments: serde_json::Value) -> Self {
            Self::CallTools(vec![(name.to_string(), arguments)])
        }

        pub fn narrate_call(text: &str, name: &str, arguments: serde_json::Value) -> Self {
            Self::NarrateTools(text.to_string(), vec![(name.to_string(), arguments)])
        }

        pub fn fail_after(fragments: &[&str]) -> Self {
            Self::FailAfter(fragments.iter().map(|f| (*f).to_string()).collect())
        }
    }

    /// Backend replaying a fixed script; once the script is exhausted it
    /// answers `echo: <last user text>`.
    #[derive(Default)]
    pub struct ScriptedBackend {
        steps: Mutex<VecDeque<Step>>,
        delay: Duration,
        /// Models requested, in call order.
        pub models_seen: Mutex<Vec<String>>,
        /// Prompt lengths received, in call order.
        pub prompt_lens: Mutex<Vec<usize>>,
    }

    impl ScriptedBackend {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                ..Self::default()
            }
        }

        /// Sleep this long in every round.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn rounds(&self) -> usize {
            self.prompt_lens.lock().unwrap().len()
        }

        fn next_step(&self, request: &CompletionRequest<'_>) -> (usize, Step) {
            self.models_seen.lock().unwrap().push(request.model.to_string());
            let round = {
                let mut lens = self.prompt_lens.lock().unwrap();
                lens.push(request.messages.len());
                lens.len()
            };
            let step = self.steps.lock().unwrap().pop_front().unwrap_or_else(|| {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find_map(|m| match m {
                        PromptMessage::User(text) => Some(text.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                Step::Answer(vec![format!("echo: {last_user}")])
            });
            (round, step)
        }

        async fn run(
            &self,
            request: CompletionRequest<'_>,
            sink: Option<&ChunkSink>,
        ) -> Result<Completion, UpstreamError> {
            let (round, step) = self.next_step(&request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let emit = |fragments: Vec<String>| {
                let mut content = String::new();
                for fragment in fragments {
                    content.push_str(&fragment);
                    if let Some(sink) = sink {
                        sink.send(fragment).ok();
                    }
                }
                content
            };
            match step {
                Step::Answer(fragments) => Ok(Completion {
                    content: emit(fragments),
                    tool_calls: Vec::new(),
                }),
                Step::CallTools(calls) => Ok(Completion {
                    content: String::new(),
                    tool_calls: requested(round, calls),
                }),
                Step::NarrateTools(text, calls) => Ok(Completion {
                    content: emit(vec![text]),
                    tool_calls: requested(round, calls),
                }),
                Step::Fail => Err(UpstreamError::Unavailable("scripted failure".to_string())),
                Step::FailAfter(fragments) => {
                    emit(fragments);
                    Err(UpstreamError::Unavailable("stream reset".to_string()))
                }
            }
        }
    }

    fn requested(round: usize, calls: Vec<(String, serde_json::Value)>) -> Vec<RequestedToolCall> {
        calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, arguments))| RequestedToolCall {
                id: format!("call_{round}_{i}"),
                name,
                arguments,
            })
            .collect()
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn complete(
            &self,
            request: CompletionRequest<'_>,
        ) -> Result<Completion, UpstreamError> {
            self.run(request, None).await
        }

        async fn complete_streaming(
            &self,
            request: CompletionRequest<'_>,
            sink: &ChunkSink,
        ) -> Result<Completion, UpstreamError> {
            self.run(request, Some(sink)).await
        }
    }
}
