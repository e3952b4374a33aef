//! Session configuration

use std::time::Duration;

/// Configuration for a chat session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum time a streamed reply may stay open before it is
    /// forcibly terminated
    pub stream_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream_timeout: Duration::from_secs(30),
        }
    }
}
