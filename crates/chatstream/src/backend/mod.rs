//! Backend transport - the seam between the session and the chat service

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transcript::Role;

mod http;
#[cfg(any(test, feature = "test-utils"))]
mod mock;

pub use http::HttpChatBackend;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockChatBackend, MockFailure, ReplyFrame, SentMessage};

/// Raw reply bytes in arrival order, as produced by the transport.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Summary of a stored conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRecord {
    pub id: String,
    pub title: String,
}

/// One message of a stored conversation, as the backend returns it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    #[serde(rename = "createTime", default)]
    pub create_time: Option<DateTime<Utc>>,
}

/// Chat service transport.
///
/// All calls are authenticated with the bearer token passed per call; the
/// transport never caches credentials.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Create a new conversation and return its server-assigned id.
    async fn create_conversation(&self, token: &str) -> Result<String>;

    /// Send one user message and open the chunked reply stream.
    async fn open_reply_stream(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<ReplyStream>;

    /// List the stored conversation summaries.
    async fn list_records(&self, token: &str) -> Result<Vec<ChatRecord>>;

    /// Fetch the full message history of a conversation.
    async fn fetch_history(&self, token: &str, chat_id: &str) -> Result<Vec<HistoryMessage>>;
}
