//! Per-session conversational agent.
//!
//! Each [`ConversationAgent`] owns one session's [`ChatState`] and a bounded job
//! queue drained by a single worker task. Turns and history clears run one at
//! a time in submission order; model switches and reads bypass the queue.
//!
//! State changes go through one commit path: clone the current state,
//! apply the change, persist it, then publish it. Readers only ever take the
//! read lock for a clone, so they never wait on a turn or on storage.
//!
//! Streamed turns only carry the text of the model's final round; see
//! [`ToolOrchestrator::run_turn`].

pub mod registry;

pub use registry::{AgentDeps, AgentRegistry};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::chat::{ChatState, Message, SessionId, now_millis};
use crate::llm::UpstreamError;
use crate::orchestrator::{ToolOrchestrator, TurnOutput};
use crate::storage::{SessionStore, StoreError};

/// Agent operation failures.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Message text was blank after trimming.
    #[error("message text must not be empty")]
    EmptyInput,
    /// Model identifier was blank after trimming.
    #[error("model must not be empty")]
    EmptyModel,
    /// Too many turns are already queued for this session.
    #[error("session is busy; too many queued turns")]
    Busy,
    /// The model backend failed; the turn was aborted.
    #[error("model backend error: {0}")]
    Upstream(#[from] UpstreamError),
    /// Persisting the state failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    /// The session was deleted while the agent was still in use.
    #[error("session no longer exists: {0}")]
    SessionGone(SessionId),
}

/// Streamed turn: text fragments in generation order, then either a clean end
/// or exactly one `Err` item.
pub type TurnStream = ReceiverStream<Result<String, AgentError>>;

/// Activity notice emitted when a turn finishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Activity {
    /// Session that was active.
    pub session_id: SessionId,
    /// When the turn finished.
    pub at: DateTime<Utc>,
}

/// Channel on which agents report [`Activity`].
pub type ActivitySender = mpsc::UnboundedSender<Activity>;

type StateReply = oneshot::Sender<Result<ChatState, AgentError>>;

enum Reply {
    State(StateReply),
    Stream(mpsc::Sender<Result<String, AgentError>>),
}

enum Job {
    Turn {
        text: String,
        model: Option<String>,
        reply: Reply,
    },
    Clear {
        reply: StateReply,
    },
}

/// Handle to one session's agent.
///
/// Dropping every handle closes the queue; the worker finishes what is already
/// queued and exits.
pub struct ConversationAgent {
    core: Arc<AgentCore>,
    jobs: mpsc::Sender<Job>,
    stream_buffer: usize,
}

impl ConversationAgent {
    /// Start an agent over a loaded state. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(id: SessionId, mut state: ChatState, deps: &AgentDeps) -> Self {
        // A crash mid-turn may have persisted a stale flag.
        state.is_processing = false;
        let (jobs, queue) = mpsc::channel(deps.config.max_queued_turns.max(1));
        let core = Arc::new(AgentCore {
            id,
            orchestrator: Arc::clone(&deps.orchestrator),
            store: Arc::clone(&deps.store),
            state: RwLock::new(state),
            commit_lock: Mutex::new(()),
            activity: deps.activity.clone(),
            pending: AtomicUsize::new(0),
            born: Instant::now(),
            last_used_ms: AtomicU64::new(0),
        });
        Arc::clone(&core).start_worker(queue);
        Self {
            core,
            jobs,
            stream_buffer: deps.config.stream_buffer.max(1),
        }
    }

    /// Session this agent owns.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.core.id
    }

    /// How long nothing has been queued or running; `None` while busy.
    #[must_use]
    pub fn idle_for(&self) -> Option<Duration> {
        if self.core.pending.load(Ordering::Acquire) > 0 {
            return None;
        }
        let used = Duration::from_millis(self.core.last_used_ms.load(Ordering::Acquire));
        Some(self.core.born.elapsed().saturating_sub(used))
    }

    /// Restart the idle clock.
    pub(crate) fn touch(&self) {
        self.core.touch();
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> ChatState {
        self.core.state.read().await.clone()
    }

    /// Run one turn to completion and return the resulting state.
    ///
    /// The turn keeps running if the returned future is dropped.
    ///
    /// # Errors
    /// `EmptyInput`, `Busy`, or the turn's failure.
    pub async fn send_message(
        &self,
        text: &str,
        model: Option<&str>,
    ) -> Result<ChatState, AgentError> {
        let (reply, outcome) = oneshot::channel();
        self.enqueue(text, model, Reply::State(reply))?;
        outcome
            .await
            .unwrap_or_else(|_| Err(AgentError::SessionGone(self.core.id.clone())))
    }

    /// Queue a streamed turn and return its fragment stream immediately.
    ///
    /// # Errors
    /// `EmptyInput` or `Busy`; later failures arrive on the stream.
    pub fn send_message_streaming(
        &self,
        text: &str,
        model: Option<&str>,
    ) -> Result<TurnStream, AgentError> {
        let (chunks, stream) = mpsc::channel(self.stream_buffer);
        self.enqueue(text, model, Reply::Stream(chunks))?;
        Ok(ReceiverStream::new(stream))
    }

    /// Switch the model used from the next turn on. A turn already running
    /// keeps the model it started with.
    ///
    /// # Errors
    /// `EmptyModel`, or a persistence failure.
    pub async fn update_model(&self, model: &str) -> Result<ChatState, AgentError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(AgentError::EmptyModel);
        }
        let model = model.to_string();
        let state = self.core.commit(|state| state.model = model).await?;
        info!(session_id = %self.core.id, model = %state.model, "Model updated");
        Ok(state)
    }

    /// Empty the history once queued turns ahead of it have finished.
    ///
    /// # Errors
    /// Returns a persistence failure.
    pub async fn clear_history(&self) -> Result<ChatState, AgentError> {
        let (reply, outcome) = oneshot::channel();
        self.core.pending.fetch_add(1, Ordering::AcqRel);
        if self.jobs.send(Job::Clear { reply }).await.is_err() {
            self.core.job_done();
            return Err(AgentError::SessionGone(self.core.id.clone()));
        }
        outcome
            .await
            .unwrap_or_else(|_| Err(AgentError::SessionGone(self.core.id.clone())))
    }

    fn enqueue(&self, text: &str, model: Option<&str>, reply: Reply) -> Result<(), AgentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::EmptyInput);
        }
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let job = Job::Turn {
            text: text.to_string(),
            model,
            reply,
        };
        self.core.pending.fetch_add(1, Ordering::AcqRel);
        self.jobs.try_send(job).map_err(|err| {
            self.core.job_done();
            match err {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(session_id = %self.core.id, "Turn rejected; queue is full");
                    AgentError::Busy
                }
                mpsc::error::TrySendError::Closed(_) => {
                    AgentError::SessionGone(self.core.id.clone())
                }
            }
        })
    }
}

/// State and collaborators shared between the handle and its worker.
struct AgentCore {
    id: SessionId,
    orchestrator: Arc<ToolOrchestrator>,
    store: Arc<dyn SessionStore>,
    state: RwLock<ChatState>,
    commit_lock: Mutex<()>,
    activity: Option<ActivitySender>,
    /// Jobs accepted but not finished yet.
    pending: AtomicUsize,
    born: Instant,
    /// Milliseconds after `born` of the last use.
    last_used_ms: AtomicU64,
}

impl AgentCore {
    fn touch(&self) {
        let elapsed = u64::try_from(self.born.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_used_ms.store(elapsed, Ordering::Release);
    }

    fn job_done(&self) {
        self.touch();
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    fn start_worker(self: Arc<Self>, mut queue: mpsc::Receiver<Job>) {
        tokio::spawn(async move {
            debug!(session_id = %self.id, "Agent worker started");
            while let Some(job) = queue.recv().await {
                match job {
                    Job::Turn { text, model, reply } => self.run_turn(text, model, reply).await,
                    Job::Clear { reply } => {
                        let cleared = self.commit(|state| state.messages.clear()).await;
                        if cleared.is_ok() {
                            info!(session_id = %self.id, "History cleared");
                        }
                        reply.send(cleared).ok();
                    }
                }
                self.job_done();
            }
            debug!(session_id = %self.id, "Agent worker stopped");
        });
    }

    /// Clone, apply, persist, publish.
    async fn commit(&self, apply: impl FnOnce(&mut ChatState)) -> Result<ChatState, AgentError> {
        let _guard = self.commit_lock.lock().await;
        let mut next = self.state.read().await.clone();
        apply(&mut next);
        if !self.store.save_state(self.id.clone(), &next).await? {
            return Err(AgentError::SessionGone(self.id.clone()));
        }
        *self.state.write().await = next.clone();
        Ok(next)
    }

    /// Finish a turn. If persisting fails, the in-memory flag is still cleared
    /// so the session is never left stuck in processing.
    async fn finish(&self, apply: impl FnOnce(&mut ChatState)) -> Result<ChatState, AgentError> {
        let result = self
            .commit(|state| {
                apply(state);
                state.is_processing = false;
            })
            .await;
        if let Err(err) = &result {
            error!(session_id = %self.id, error = %err, "Failed to persist turn result");
            let _guard = self.commit_lock.lock().await;
            self.state.write().await.is_processing = false;
        }
        result
    }

    async fn run_turn(&self, text: String, model: Option<String>, reply: Reply) {
        let user_message = Message::user(text);
        let prompt_message = user_message.clone();
        let started = self
            .commit(|state| {
                if let Some(model) = model {
                    state.model = model;
                }
                state.messages.push(user_message);
                state.is_processing = true;
            })
            .await;
        let state = match started {
            Ok(state) => state,
            Err(err) => {
                reply.fail(err).await;
                return;
            }
        };

        let history = &state.messages[..state.messages.len().saturating_sub(1)];
        info!(
            session_id = %self.id,
            model = %state.model,
            history = history.len(),
            "Turn started"
        );

        match reply {
            Reply::State(reply) => {
                let outcome = self
                    .orchestrator
                    .run_turn(history, &state.model, &prompt_message, None)
                    .await;
                let result = match outcome {
                    Ok(output) => self.complete(output).await,
                    Err(err) => self.abort(err).await,
                };
                reply.send(result).ok();
            }
            Reply::Stream(client) => {
                let (sink, chunks) = mpsc::unbounded_channel();
                let turn = async {
                    let outcome = self
                        .orchestrator
                        .run_turn(history, &state.model, &prompt_message, Some(&sink))
                        .await;
                    drop(sink);
                    outcome
                };
                let (outcome, ()) = tokio::join!(turn, relay(&self.id, chunks, &client));
                let result = match outcome {
                    Ok(output) => self.complete(output).await,
                    Err(err) => self.abort(err).await,
                };
                if let Err(err) = result {
                    client.send(Err(err)).await.ok();
                }
            }
        }
    }

    async fn complete(&self, output: TurnOutput) -> Result<ChatState, AgentError> {
        let mut reply = Message::assistant(output.content, output.tool_calls);
        reply.truncated = output.truncated;
        let tool_calls = reply.tool_calls.len();
        let state = self.finish(|state| state.messages.push(reply)).await?;
        info!(
            session_id = %self.id,
            tool_calls,
            truncated = output.truncated,
            "Turn finished"
        );
        self.report_activity();
        Ok(state)
    }

    /// Record a failed turn: the user message stays, no reply is appended.
    async fn abort(&self, err: UpstreamError) -> Result<ChatState, AgentError> {
        warn!(session_id = %self.id, error = %err, "Turn aborted by backend failure");
        self.finish(|_| {}).await?;
        Err(AgentError::Upstream(err))
    }

    fn report_activity(&self) {
        if let Some(activity) = &self.activity {
            activity
                .send(Activity {
                    session_id: self.id.clone(),
                    at: now_millis(),
                })
                .ok();
        }
    }
}

impl Reply {
    async fn fail(self, err: AgentError) {
        match self {
            Self::State(reply) => {
                reply.send(Err(err)).ok();
            }
            Self::Stream(client) => {
                client.send(Err(err)).await.ok();
            }
        }
    }
}

/// Forward fragments to the client. A client that went away stops receiving,
/// but the channel is still drained so the turn completes.
async fn relay(
    id: &SessionId,
    mut chunks: mpsc::UnboundedReceiver<String>,
    client: &mpsc::Sender<Result<String, AgentError>>,
) {
    let mut listening = true;
    while let Some(chunk) = chunks.recv().await {
        if listening && client.send(Ok(chunk)).await.is_err() {
            debug!(session_id = %id, "Stream client disconnected; finishing turn");
            listening = false;
        }
    }
}
