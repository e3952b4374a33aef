//! Live chat session - streamed replies driven into a transcript.
//!
//! The session owns the conversation transcript and the lifecycle of at most
//! one in-flight streamed reply. Sending dispatches the message, appends the
//! user entry plus an empty assistant entry, then appends decoded chunks to
//! that assistant entry as they arrive. A reply ends by natural completion,
//! user stop, fixed timeout, or read failure; every ending releases the
//! loading flag and the stream handle before anything else may start.

mod stream;

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::backend::{ChatBackend, ChatRecord, ReplyStream};
use crate::config::SessionConfig;
use crate::error::{ChatError, Result};
use crate::transcript::{Message, Role};

use stream::{ActiveStream, Utf8Carry};

pub use stream::{INTERRUPTED_PLACEHOLDER, INTERRUPTED_SUFFIX, StopReason, StreamEvent};

/// Appended when an operation needs a login first.
pub const NOTICE_AUTH_REQUIRED: &str = "Authentication required: please log in first.";

/// Appended when the backend rejects the stored credentials.
pub const NOTICE_SESSION_EXPIRED: &str = "Session expired: please log in again.";

#[derive(Debug)]
struct SessionState {
    transcript: Vec<Message>,
    conversation_id: Option<String>,
    is_loading: bool,
    active: Option<ActiveStream>,
    /// Claim generation. Every operation that takes over the session bumps
    /// this; a continuation resuming after an await compares it to detect
    /// that it was displaced while suspended.
    op: u64,
}

enum StreamOutcome {
    Completed,
    Interrupted(StopReason),
    Failed(ChatError),
}

/// Live chat session.
///
/// All operations take `&self` and may be called concurrently from
/// independent tasks. A new send displaces a reply that is still streaming;
/// [`ChatSession::stop_response`] returns only once the stream it stopped
/// has fully torn down. No operation returns an error: every failure ends as
/// a system message in the transcript with the session back at idle.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    tokens: Arc<dyn TokenProvider>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
}

impl ChatSession {
    /// Create a session with the default configuration.
    pub fn new(backend: Arc<dyn ChatBackend>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_config(backend, tokens, SessionConfig::default())
    }

    /// Create a session with an explicit configuration.
    pub fn with_config(
        backend: Arc<dyn ChatBackend>,
        tokens: Arc<dyn TokenProvider>,
        config: SessionConfig,
    ) -> Self {
        Self {
            backend,
            tokens,
            config,
            state: Mutex::new(SessionState {
                transcript: Vec::new(),
                conversation_id: None,
                is_loading: false,
                active: None,
                op: 0,
            }),
            events: None,
        }
    }

    /// Attach an event sink for streaming updates.
    pub fn with_event_sink(mut self, events: mpsc::UnboundedSender<StreamEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Read-only copy of the transcript.
    pub fn transcript(&self) -> Vec<Message> {
        self.state.lock().transcript.clone()
    }

    /// Whether a reply is currently being received.
    pub fn is_loading(&self) -> bool {
        self.state.lock().is_loading
    }

    /// Server-assigned conversation id, once one exists.
    pub fn conversation_id(&self) -> Option<String> {
        self.state.lock().conversation_id.clone()
    }

    /// Send one user message and stream the reply into the transcript.
    ///
    /// Empty or whitespace-only input is a silent no-op. A reply that is
    /// still streaming is stopped first; one send displaces any prior
    /// in-flight reply.
    pub async fn send_message(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if self.is_loading() {
            self.stop_response().await;
        }

        let my_op = self.claim();
        let _claim = scopeguard::guard((), |_| self.release(my_op));

        let request_id = Uuid::new_v4();
        debug!(%request_id, "dispatching chat message");

        let Some(token) = self.tokens.bearer_token() else {
            info!(%request_id, "send aborted: not logged in");
            self.fail_send(my_op, send_failure_notice(&ChatError::AuthRequired));
            return;
        };

        let chat_id = match self.ensure_conversation(&token).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%request_id, error = %err, "conversation creation failed");
                self.fail_send(my_op, send_failure_notice(&err));
                return;
            }
        };

        if !self.owns(my_op) {
            debug!(%request_id, "send displaced during conversation creation");
            return;
        }

        let reply = match self.backend.open_reply_stream(&token, &chat_id, text).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%request_id, error = %err, "send dispatch failed");
                self.fail_send(my_op, send_failure_notice(&err));
                return;
            }
        };

        self.stream_reply(my_op, request_id, text, reply).await;
    }

    /// Stop the in-flight reply, if any.
    ///
    /// Returns once the stream has fully torn down, so a caller may start a
    /// new send immediately afterwards. Safe to call at any time: with no
    /// active stream it only forces the loading flag off.
    pub async fn stop_response(&self) {
        let (waiter, seen_op) = {
            let state = self.state.lock();
            let waiter = state
                .active
                .as_ref()
                .map(|active| (active.cancel.clone(), active.done.clone()));
            (waiter, state.op)
        };

        if let Some((cancel, mut done)) = waiter {
            cancel.cancel();
            // A dropped sender counts as torn down too.
            while !*done.borrow() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        }

        // Force the loading flag off even when no stream existed, unless a
        // newer operation claimed the session while we waited.
        let mut state = self.state.lock();
        if state.op == seen_op {
            state.is_loading = false;
            state.active = None;
        }
    }

    /// List the stored conversation summaries.
    ///
    /// The list is advisory UI data owned by the caller; every failure path
    /// degrades to an empty list instead of surfacing an error.
    pub async fn load_chat_records(&self) -> Vec<ChatRecord> {
        let Some(token) = self.tokens.bearer_token() else {
            debug!("record listing skipped: not logged in");
            return Vec::new();
        };

        match self.backend.list_records(&token).await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "record listing failed");
                Vec::new()
            }
        }
    }

    /// Switch the session to a stored conversation.
    ///
    /// Stops any in-flight reply, then replaces the transcript wholesale
    /// with the fetched history. Never merges: this is a context switch, not
    /// an append.
    pub async fn load_chat(&self, conversation_id: &str) {
        if self.is_loading() {
            self.stop_response().await;
        }

        let my_op = {
            let mut state = self.state.lock();
            if let Some(stale) = state.active.take() {
                debug!("clearing stale stream handle");
                stale.cancel.cancel();
            }
            state.is_loading = false;
            state.op += 1;
            state.conversation_id = Some(conversation_id.to_string());
            state.op
        };

        debug!(conversation_id, "loading conversation history");

        let Some(token) = self.tokens.bearer_token() else {
            info!("history load aborted: not logged in");
            self.replace_with_notice(my_op, load_failure_notice(&ChatError::AuthRequired));
            return;
        };

        match self.backend.fetch_history(&token, conversation_id).await {
            Ok(history) => {
                let messages: Vec<Message> = history
                    .into_iter()
                    .map(|entry| Message {
                        role: entry.role,
                        content: entry.content,
                        created_at: entry.create_time.unwrap_or_else(Utc::now),
                    })
                    .collect();
                debug!(conversation_id, count = messages.len(), "history loaded");
                self.replace_transcript(my_op, messages);
            }
            Err(err) => {
                warn!(conversation_id, error = %err, "history load failed");
                self.replace_with_notice(my_op, load_failure_notice(&err));
            }
        }
    }

    /// Take over the session for a new send, clearing any stale stream
    /// state an abandoned operation may have left behind.
    fn claim(&self) -> u64 {
        let mut state = self.state.lock();
        if let Some(stale) = state.active.take() {
            debug!("clearing stale stream handle");
            stale.cancel.cancel();
        }
        state.is_loading = true;
        state.op += 1;
        state.op
    }

    fn owns(&self, my_op: u64) -> bool {
        let state = self.state.lock();
        state.op == my_op && state.is_loading
    }

    /// Idempotent claim release; a no-op once another operation owns the
    /// session.
    fn release(&self, my_op: u64) {
        let mut state = self.state.lock();
        if state.op == my_op && state.is_loading {
            state.is_loading = false;
            state.active = None;
        }
    }

    /// Record a send failure: one system message, session back at idle.
    /// Skipped entirely when the send was displaced.
    fn fail_send(&self, my_op: u64, notice: String) {
        let mut state = self.state.lock();
        if state.op != my_op || !state.is_loading {
            return;
        }
        state.transcript.push(Message::system(&notice));
        state.is_loading = false;
        state.active = None;
        drop(state);
        self.emit(StreamEvent::Notice(notice));
    }

    /// Resolve the conversation id, creating one on first send. An id set
    /// concurrently wins; a created id never overwrites it.
    async fn ensure_conversation(&self, token: &str) -> Result<String> {
        if let Some(id) = self.state.lock().conversation_id.clone() {
            return Ok(id);
        }

        let created = self.backend.create_conversation(token).await?;

        let mut state = self.state.lock();
        Ok(state.conversation_id.get_or_insert(created).clone())
    }

    /// Append the user message and the in-flight assistant placeholder,
    /// install the stream handle, and run the read loop to its end.
    async fn stream_reply(
        &self,
        my_op: u64,
        request_id: Uuid,
        text: &str,
        mut reply: ReplyStream,
    ) {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        {
            let mut state = self.state.lock();
            if state.op != my_op || !state.is_loading {
                debug!(%request_id, "send displaced before streaming started");
                return;
            }
            state.transcript.push(Message::user(text));
            state.transcript.push(Message::assistant(""));
            state.active = Some(ActiveStream {
                cancel: cancel.clone(),
                done: done_rx,
            });
        }

        info!(%request_id, "reply stream opened");

        let mut decoder = Utf8Carry::default();
        let deadline = tokio::time::sleep(self.config.stream_timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break StreamOutcome::Interrupted(StopReason::UserTerminated);
                }
                _ = &mut deadline => {
                    cancel.cancel();
                    break StreamOutcome::Interrupted(StopReason::ResponseTimeout);
                }
                chunk = reply.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let delta = decoder.decode(&bytes);
                        self.append_delta(my_op, &delta);
                    }
                    Some(Err(err)) => break StreamOutcome::Failed(err),
                    None => {
                        let tail = decoder.finish();
                        self.append_delta(my_op, &tail);
                        break StreamOutcome::Completed;
                    }
                },
            }
        };

        // Teardown runs on every exit path; the flag and handle are released
        // before anyone waiting on `done` resumes.
        let owned = {
            let mut state = self.state.lock();
            let owned = state.op == my_op;
            if owned {
                if matches!(outcome, StreamOutcome::Interrupted(_)) {
                    mark_interrupted(&mut state.transcript);
                }
                state.is_loading = false;
                state.active = None;
            }
            owned
        };
        let _ = done_tx.send(true);

        if !owned {
            debug!(%request_id, "stream outcome discarded after displacement");
            return;
        }

        match outcome {
            StreamOutcome::Completed => {
                debug!(%request_id, "reply stream completed");
                self.emit(StreamEvent::Completed);
            }
            StreamOutcome::Interrupted(reason) => {
                info!(%request_id, %reason, "reply stream interrupted");
                self.emit(StreamEvent::Interrupted(reason));
            }
            StreamOutcome::Failed(err) => {
                warn!(%request_id, error = %err, "reply stream read failed");
                self.emit(StreamEvent::Error(err.to_string()));
            }
        }
    }

    /// Append decoded text to the in-flight assistant message.
    fn append_delta(&self, my_op: u64, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        if state.op != my_op || !state.is_loading {
            return;
        }
        let Some(message) = state.transcript.last_mut() else {
            return;
        };
        if message.role != Role::Assistant {
            return;
        }
        message.content.push_str(delta);
        drop(state);
        self.emit(StreamEvent::Delta(delta.to_string()));
    }

    fn replace_transcript(&self, my_op: u64, messages: Vec<Message>) {
        let mut state = self.state.lock();
        if state.op != my_op {
            return;
        }
        state.transcript = messages;
    }

    fn replace_with_notice(&self, my_op: u64, notice: String) {
        let mut state = self.state.lock();
        if state.op != my_op {
            return;
        }
        state.transcript = vec![Message::system(&notice)];
        drop(state);
        self.emit(StreamEvent::Notice(notice));
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Label the in-flight assistant message so an interrupted reply is never
/// left looking like a complete answer.
fn mark_interrupted(transcript: &mut [Message]) {
    if let Some(message) = transcript.last_mut()
        && message.role == Role::Assistant
    {
        if message.content.is_empty() {
            message.content.push_str(INTERRUPTED_PLACEHOLDER);
        } else {
            message.content.push_str(INTERRUPTED_SUFFIX);
        }
    }
}

fn send_failure_notice(err: &ChatError) -> String {
    match err {
        ChatError::AuthRequired => NOTICE_AUTH_REQUIRED.to_string(),
        ChatError::SessionExpired => NOTICE_SESSION_EXPIRED.to_string(),
        err => format!("The message could not be sent: {err}"),
    }
}

fn load_failure_notice(err: &ChatError) -> String {
    match err {
        ChatError::AuthRequired => NOTICE_AUTH_REQUIRED.to_string(),
        ChatError::SessionExpired => NOTICE_SESSION_EXPIRED.to_string(),
        err => format!("The conversation could not be loaded: {err}"),
    }
}
