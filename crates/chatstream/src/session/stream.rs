//! Reply stream lifecycle types

use std::fmt;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Replaces an interrupted reply that had produced no text yet.
pub const INTERRUPTED_PLACEHOLDER: &str = "response interrupted";

/// Appended to a non-empty reply that was cut off mid-stream.
pub const INTERRUPTED_SUFFIX: &str = "\n\nresponse interrupted";

/// Why an in-flight reply was cut off. Diagnostic only; the backend never
/// sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    UserTerminated,
    ResponseTimeout,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserTerminated => write!(f, "user terminated"),
            Self::ResponseTimeout => write!(f, "response timeout"),
        }
    }
}

/// Events observed while the session works.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Text appended to the in-flight assistant message.
    Delta(String),
    /// The reply finished normally.
    Completed,
    /// The reply was cut off before completion.
    Interrupted(StopReason),
    /// The reply stream failed mid-read.
    Error(String),
    /// A system notice was appended to the transcript.
    Notice(String),
}

/// Handle to the single in-flight reply stream.
///
/// `cancel` asks the read loop to stop; `done` flips to `true` once the loop
/// has fully torn down (marker applied, state cleared). Waiters clone `done`
/// rather than taking it, so racing stop calls all observe the teardown.
#[derive(Debug)]
pub(crate) struct ActiveStream {
    pub(crate) cancel: CancellationToken,
    pub(crate) done: watch::Receiver<bool>,
}

/// Incremental UTF-8 decoder.
///
/// The transport chunks bytes with no regard for code point boundaries, so a
/// multi-byte sequence can be split across chunks. A truncated tail is held
/// back and completed by the next chunk instead of being decoded as
/// replacement characters.
#[derive(Debug, Default)]
pub(crate) struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Decode the next chunk, holding back a trailing partial code point.
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let split = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // A clean cut mid code point: keep the tail for the next chunk.
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            // Invalid bytes inside the buffer: decode lossily and move on.
            Err(_) => self.pending.len(),
        };

        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    /// Flush whatever is still held back at end of stream.
    pub(crate) fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_ascii() {
        let mut decoder = Utf8Carry::default();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn reassembles_code_point_split_across_chunks() {
        // "日" is E6 97 A5
        let mut decoder = Utf8Carry::default();
        assert_eq!(decoder.decode(&[0xE6, 0x97]), "");
        assert_eq!(decoder.decode(&[0xA5, b'!']), "日!");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn reassembles_four_byte_emoji_split_one_byte_at_a_time() {
        let bytes = "🎉".as_bytes();
        let mut decoder = Utf8Carry::default();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.decode(&[*byte]));
        }
        assert_eq!(out, "🎉");
    }

    #[test]
    fn replaces_genuinely_invalid_bytes() {
        let mut decoder = Utf8Carry::default();
        let text = decoder.decode(&[b'a', 0xFF, b'b']);
        assert_eq!(text, "a\u{FFFD}b");
    }

    #[test]
    fn finish_flushes_dangling_partial_as_replacement() {
        let mut decoder = Utf8Carry::default();
        assert_eq!(decoder.decode(&[0xE6]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn stop_reasons_format_for_logging() {
        assert_eq!(StopReason::UserTerminated.to_string(), "user terminated");
        assert_eq!(StopReason::ResponseTimeout.to_string(), "response timeout");
    }
}
