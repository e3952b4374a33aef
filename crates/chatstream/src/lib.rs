//! Chatstream - a streaming chat session client
//!
//! This crate provides:
//! - A chat session that drives streamed replies into a transcript
//! - Chunked reply streaming with incremental UTF-8 decoding
//! - Cooperative cancellation plus a fixed reply timeout
//! - A pluggable backend transport with a deterministic mock for tests

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod session;
pub mod transcript;

// Re-export commonly used types
pub use auth::{TokenProvider, TokenStore};
pub use backend::{ChatBackend, ChatRecord, HistoryMessage, HttpChatBackend, ReplyStream};
pub use config::SessionConfig;
pub use error::{ChatError, Result};
pub use session::{
    ChatSession, INTERRUPTED_PLACEHOLDER, INTERRUPTED_SUFFIX, NOTICE_AUTH_REQUIRED,
    NOTICE_SESSION_EXPIRED, StopReason, StreamEvent,
};
pub use transcript::{Message, Role};

#[cfg(any(test, feature = "test-utils"))]
pub use backend::{MockChatBackend, MockFailure, ReplyFrame, SentMessage};
