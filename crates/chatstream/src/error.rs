//! Error types for the chat client

use thiserror::Error;

/// Chat client error types
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Session expired")]
    SessionExpired,

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("Reply stream unavailable")]
    StreamUnavailable,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;
