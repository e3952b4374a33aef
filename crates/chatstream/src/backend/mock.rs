//! Deterministic mock backend for session behavior tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::{Duration, sleep};

use crate::backend::{ChatBackend, ChatRecord, HistoryMessage, ReplyStream};
use crate::error::{ChatError, Result};

/// Scripted failure for any mock endpoint.
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// The backend rejects the credentials (401).
    AuthExpired,
    /// Any other non-success status.
    Status(u16),
    /// The send succeeded but no readable body was produced.
    StreamUnavailable,
    /// A transport-level failure with a message.
    Backend(String),
}

impl MockFailure {
    fn into_error(self) -> ChatError {
        match self {
            MockFailure::AuthExpired => ChatError::SessionExpired,
            MockFailure::Status(code) => ChatError::UnexpectedStatus(code),
            MockFailure::StreamUnavailable => ChatError::StreamUnavailable,
            MockFailure::Backend(message) => ChatError::Backend(message),
        }
    }
}

/// One scripted frame of a mock reply stream.
#[derive(Debug, Clone)]
pub enum ReplyFrame {
    /// Emit raw bytes after an optional delay.
    Chunk { bytes: Vec<u8>, delay_ms: u64 },
    /// Fail the stream with a read error.
    ReadError(String),
    /// Stop emitting and never signal end-of-stream.
    Stall,
}

impl ReplyFrame {
    pub fn text(chunk: impl Into<String>) -> Self {
        Self::Chunk {
            bytes: chunk.into().into_bytes(),
            delay_ms: 0,
        }
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Chunk {
            bytes: bytes.into(),
            delay_ms: 0,
        }
    }

    pub fn read_error(message: impl Into<String>) -> Self {
        Self::ReadError(message.into())
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        if let Self::Chunk { delay_ms, .. } = &mut self {
            *delay_ms = ms;
        }
        self
    }
}

/// One scripted response to a send.
#[derive(Debug, Clone)]
enum SendStep {
    Reply(Vec<ReplyFrame>),
    Fail(MockFailure),
}

/// A message captured by the mock when a send was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
}

/// A deterministic scripted backend.
///
/// Each endpoint pops its next scripted step; with an empty script the mock
/// falls back to a benign default (an echo reply, a fixed conversation id,
/// empty listings) so simple tests need no setup.
#[derive(Debug, Default)]
pub struct MockChatBackend {
    create_script: Mutex<VecDeque<std::result::Result<String, MockFailure>>>,
    send_script: Mutex<VecDeque<SendStep>>,
    records_script: Mutex<VecDeque<std::result::Result<Vec<ChatRecord>, MockFailure>>>,
    history_script: Mutex<VecDeque<std::result::Result<Vec<HistoryMessage>, MockFailure>>>,
    open_delay_ms: AtomicU64,
    create_calls: AtomicUsize,
    send_calls: AtomicUsize,
    records_calls: AtomicUsize,
    history_calls: AtomicUsize,
    sent: Mutex<Vec<SentMessage>>,
}

impl MockChatBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the id returned by the next conversation creation.
    pub fn script_conversation_id(&self, id: impl Into<String>) {
        self.create_script.lock().push_back(Ok(id.into()));
    }

    pub fn fail_create(&self, failure: MockFailure) {
        self.create_script.lock().push_back(Err(failure));
    }

    /// Script the frames played by the next reply stream.
    pub fn script_reply(&self, frames: Vec<ReplyFrame>) {
        self.send_script.lock().push_back(SendStep::Reply(frames));
    }

    pub fn fail_send(&self, failure: MockFailure) {
        self.send_script.lock().push_back(SendStep::Fail(failure));
    }

    pub fn script_records(&self, records: Vec<ChatRecord>) {
        self.records_script.lock().push_back(Ok(records));
    }

    pub fn fail_records(&self, failure: MockFailure) {
        self.records_script.lock().push_back(Err(failure));
    }

    pub fn script_history(&self, history: Vec<HistoryMessage>) {
        self.history_script.lock().push_back(Ok(history));
    }

    pub fn fail_history(&self, failure: MockFailure) {
        self.history_script.lock().push_back(Err(failure));
    }

    /// Delay every send dispatch, to exercise callers mid-dispatch.
    pub fn set_open_delay_ms(&self, ms: u64) {
        self.open_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn records_calls(&self) -> usize {
        self.records_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    /// Messages captured from dispatched sends, in order.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn create_conversation(&self, _token: &str) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        match self.create_script.lock().pop_front() {
            Some(Ok(id)) => Ok(id),
            Some(Err(failure)) => Err(failure.into_error()),
            None => Ok("chat-mock".to_string()),
        }
    }

    async fn open_reply_stream(
        &self,
        _token: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<ReplyStream> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });

        let delay_ms = self.open_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }

        let step = self
            .send_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| SendStep::Reply(vec![ReplyFrame::text(format!("mock-echo: {text}"))]));

        let frames = match step {
            SendStep::Fail(failure) => return Err(failure.into_error()),
            SendStep::Reply(frames) => frames,
        };

        Ok(Box::pin(try_stream! {
            for frame in frames {
                match frame {
                    ReplyFrame::Chunk { bytes, delay_ms } => {
                        if delay_ms > 0 {
                            sleep(Duration::from_millis(delay_ms)).await;
                        }
                        yield Bytes::from(bytes);
                    }
                    ReplyFrame::ReadError(message) => {
                        Err(ChatError::Backend(message))?;
                    }
                    ReplyFrame::Stall => {
                        std::future::pending::<()>().await;
                    }
                }
            }
        }))
    }

    async fn list_records(&self, _token: &str) -> Result<Vec<ChatRecord>> {
        self.records_calls.fetch_add(1, Ordering::SeqCst);

        match self.records_script.lock().pop_front() {
            Some(Ok(records)) => Ok(records),
            Some(Err(failure)) => Err(failure.into_error()),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_history(&self, _token: &str, _chat_id: &str) -> Result<Vec<HistoryMessage>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);

        match self.history_script.lock().pop_front() {
            Some(Ok(history)) => Ok(history),
            Some(Err(failure)) => Err(failure.into_error()),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn mock_plays_scripted_frames_in_order() {
        let backend = MockChatBackend::new();
        backend.script_reply(vec![ReplyFrame::text("one"), ReplyFrame::text("two")]);

        let mut stream = backend
            .open_reply_stream("token", "chat-1", "hi")
            .await
            .expect("stream should open");

        let first = stream.next().await.expect("first frame").expect("ok frame");
        assert_eq!(&first[..], b"one");
        let second = stream.next().await.expect("second frame").expect("ok frame");
        assert_eq!(&second[..], b"two");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn mock_surfaces_scripted_read_error() {
        let backend = MockChatBackend::new();
        backend.script_reply(vec![
            ReplyFrame::text("partial"),
            ReplyFrame::read_error("connection reset"),
        ]);

        let mut stream = backend
            .open_reply_stream("token", "chat-1", "hi")
            .await
            .expect("stream should open");

        assert!(stream.next().await.expect("first frame").is_ok());
        let err = stream
            .next()
            .await
            .expect("error frame")
            .expect_err("read should fail");
        assert!(matches!(err, ChatError::Backend(_)));
    }

    #[tokio::test]
    async fn mock_falls_back_to_echo_reply() {
        let backend = MockChatBackend::new();

        let mut stream = backend
            .open_reply_stream("token", "chat-1", "ping")
            .await
            .expect("stream should open");

        let chunk = stream.next().await.expect("one frame").expect("ok frame");
        assert_eq!(&chunk[..], b"mock-echo: ping");

        let sent = backend.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "chat-1");
        assert_eq!(sent[0].text, "ping");
    }

    #[tokio::test]
    async fn mock_counts_endpoint_calls() {
        let backend = MockChatBackend::new();
        backend.fail_create(MockFailure::Status(500));

        assert!(backend.create_conversation("token").await.is_err());
        assert_eq!(backend.create_calls(), 1);

        assert!(backend.list_records("token").await.expect("records").is_empty());
        assert_eq!(backend.records_calls(), 1);
    }
}
