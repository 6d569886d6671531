//! Stream Frame Decoder
//!
//! Turns the raw line stream of a `/chat_stream` response body into typed
//! protocol events. One decoder instance serves one session; after a `Done`
//! or `Error` event it yields nothing further.
//!
//! # Wire tolerance
//!
//! The relay's canonical format is NDJSON: one JSON object per line, with a
//! `response` field carrying a token or an `error` field carrying an in-band
//! failure. The decoder also accepts the SSE envelope (`data: ` prefix with
//! `[DONE]` and `[USAGE]` sentinels) so a legacy or proxied server does not
//! break the client. NDJSON is primary; SSE is a fallback, not a second
//! protocol.
//!
//! Malformed lines are never fatal: a line that parses as neither envelope is
//! passed through as literal token text, and a malformed `[USAGE]` payload is
//! dropped as bad telemetry.

use serde::Deserialize;

/// SSE envelope prefix
const SSE_DATA_PREFIX: &str = "data: ";
/// SSE stream-end sentinel
const DONE_SENTINEL: &str = "[DONE]";
/// Usage telemetry sentinel
const USAGE_SENTINEL: &str = "[USAGE]";

// ============================================================================
// Events
// ============================================================================

/// Token usage reported by the peer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub prompt: Option<u64>,
    /// Tokens generated in the completion
    pub completion: Option<u64>,
    /// Total tokens for the exchange
    pub total: Option<u64>,
}

/// One decoded protocol event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of generated text
    Token(String),
    /// Out-of-band usage telemetry
    Usage(TokenUsage),
    /// In-band error surfaced by the peer; terminates the stream
    Error(String),
    /// Normal end of stream
    Done,
}

/// Frame body shape shared by both envelopes
#[derive(Deserialize)]
struct Frame {
    response: Option<String>,
    error: Option<String>,
}

// ============================================================================
// Decoder
// ============================================================================

/// Per-session line classifier
///
/// Feed it complete lines (no trailing newline); it returns at most one event
/// per line. Not reusable across sessions.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    finished: bool,
}

impl FrameDecoder {
    /// Create a fresh decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminating event (`Done` or `Error`) has been emitted
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Classify one line of the response body.
    ///
    /// Returns `None` for empty lines, swallowed telemetry, and anything
    /// after the stream has terminated.
    pub fn decode_line(&mut self, line: &str) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return None;
        }

        if let Some(rest) = line.strip_prefix(SSE_DATA_PREFIX) {
            return self.decode_sse(rest);
        }

        // Plain NDJSON line
        match serde_json::from_str::<Frame>(line) {
            Ok(frame) => self.decode_frame(frame, line),
            Err(_) => {
                // Non-JSON lines are tolerated as literal content
                Some(StreamEvent::Token(line.to_string()))
            }
        }
    }

    /// Decode the payload of an SSE `data: ` line
    fn decode_sse(&mut self, rest: &str) -> Option<StreamEvent> {
        if rest == DONE_SENTINEL {
            self.finished = true;
            return Some(StreamEvent::Done);
        }

        if rest.starts_with(USAGE_SENTINEL) {
            return self.decode_usage(rest);
        }

        match serde_json::from_str::<Frame>(rest) {
            Ok(frame) => self.decode_frame(frame, rest),
            Err(_) => Some(StreamEvent::Token(rest.to_string())),
        }
    }

    /// Apply the shared `response`/`error` field contract
    fn decode_frame(&mut self, frame: Frame, raw: &str) -> Option<StreamEvent> {
        if let Some(token) = frame.response {
            return Some(StreamEvent::Token(token));
        }
        if let Some(error) = frame.error {
            self.finished = true;
            return Some(StreamEvent::Error(error));
        }
        // Valid JSON without the contract fields: raw passthrough, same as
        // an unparseable line
        Some(StreamEvent::Token(raw.to_string()))
    }

    /// Parse a `[USAGE]{...}` telemetry line.
    ///
    /// Malformed payloads are swallowed: usage is advisory, not content.
    fn decode_usage(&self, rest: &str) -> Option<StreamEvent> {
        let json = &rest[rest.find('{')?..];
        match serde_json::from_str::<TokenUsage>(json) {
            Ok(usage) => Some(StreamEvent::Usage(usage)),
            Err(e) => {
                tracing::debug!("dropping malformed usage frame: {e}");
                None
            }
        }
    }
}

// ============================================================================
// Line Buffering
// ============================================================================

/// Incremental splitter from byte chunks to complete lines
///
/// HTTP body chunks do not align with frame boundaries; this keeps the
/// unterminated tail until the next chunk (or `take_remainder` at EOF).
/// Buffering stays in bytes: a chunk boundary may fall inside a multi-byte
/// UTF-8 codepoint, so decoding happens per complete line, never per chunk.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line it closes
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Take whatever is left after the peer closed the connection.
    ///
    /// A final frame without a trailing newline is still a frame.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            let rest = std::mem::take(&mut self.buffer);
            Some(String::from_utf8_lossy(&rest).into_owned())
        }
    }
}
