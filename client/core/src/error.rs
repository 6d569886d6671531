//! Error Types
//!
//! Failure taxonomy for the chat client. Two conditions deliberately do not
//! appear here:
//!
//! - Cancellation is not a failure; it is a terminal session outcome
//!   ([`crate::session::OutcomeKind::Cancelled`]).
//! - Malformed stream frames are recovered inside the decoder (raw-text
//!   passthrough or dropped telemetry) and never escalate.

use thiserror::Error;

/// Errors produced by the chat client
#[derive(Debug, Error)]
pub enum ChatError {
    /// No relay endpoint has been configured
    #[error("no relay endpoint configured")]
    NotConfigured,

    /// The relay could not be reached (DNS, refused, timeout)
    #[error("failed to reach relay: {0}")]
    Connection(#[from] reqwest::Error),

    /// The relay answered with a non-success HTTP status
    #[error("relay returned HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body text, for diagnostics
        body: String,
    },

    /// The peer surfaced an in-band error frame mid-stream
    #[error("relay reported: {0}")]
    Protocol(String),
}
