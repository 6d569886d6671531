//! Tether Core - Streaming Chat Session Protocol
//!
//! This crate is the client-side core of tether: a chat app that talks to a
//! locally hosted language model through a thin HTTP relay. Everything
//! UI-shaped (rendering, navigation, persistence) lives with the caller;
//! this crate owns the request/response life-cycle of a conversation turn.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Caller (UI layer)                       │
//! │        send(text, log)              updates / outcome         │
//! └───────────┬──────────────────────────────────▲───────────────┘
//!             │                                  │
//! ┌───────────▼──────────────────────────────────┴───────────────┐
//! │                       StreamSession                           │
//! │   history::assemble ──► RelayClient ──► response body         │
//! │                              │                                │
//! │        LineBuffer ◄──────────┘                                │
//! │            │                                                  │
//! │       FrameDecoder ──► Token / Usage / Error / Done           │
//! │            │                                                  │
//! │        Coalescer ──► throttled Partial updates                │
//! │            │                                                  │
//! │     one terminal outcome (Finalized / Cancelled / Failed)     │
//! └───────────┬──────────────────────────────────────────────────┘
//!             │  POST /chat_stream (NDJSON, SSE-tolerant)
//! ┌───────────▼──────────────────────────────────────────────────┐
//! │            Relay server (thin proxy over the LLM)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Decoded events are applied strictly in wire order; partial updates
//!   carry the full accumulated text and never regress.
//! - Every session performs exactly one terminal transition. Cancellation,
//!   mid-stream errors, and natural completion race safely.
//! - Text accumulated before a failure or cancellation is preserved in the
//!   outcome.
//! - Sessions are independent: each owns its connection, decoder, and
//!   buffer, and snapshots the configuration at creation.
//!
//! # Quick Start
//!
//! ```ignore
//! use tether_core::{ClientConfig, SessionUpdate, StreamSession};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClientConfig::with_endpoint("http://localhost:8000");
//!     let session = StreamSession::new(config);
//!     let mut handle = session.send("Hello!", &[]).unwrap();
//!
//!     while let Some(update) = handle.recv().await {
//!         match update {
//!             SessionUpdate::Partial { text } => println!("so far: {text}"),
//!             SessionUpdate::Usage(usage) => println!("usage: {usage:?}"),
//!             SessionUpdate::Finished(outcome) => {
//!                 println!("{}", outcome.display_text());
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: endpoint, system prompt, timeouts, coalescing policy
//! - [`history`]: bounded history assembly for each request
//! - [`decoder`]: NDJSON/SSE frame stream → typed protocol events
//! - [`session`]: the per-request state machine and driver task
//! - [`relay`]: wire types and HTTP client for the relay routes
//! - [`health`]: connectivity probing and classification
//! - [`error`]: failure taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod decoder;
pub mod error;
pub mod health;
pub mod history;
pub mod relay;
pub mod session;

// Re-exports for convenience
pub use config::{ClientConfig, CoalescePolicy, ConfigError};
pub use decoder::{FrameDecoder, StreamEvent, TokenUsage};
pub use error::ChatError;
pub use health::{ConnectionStatus, HealthProber};
pub use history::{assemble, ConversationMessage, HistoryPayload, MessageRole};
pub use relay::{ChatReply, ChatRequest, HealthReply, RelayClient};
pub use session::{
    CancelHandle, OutcomeKind, SessionHandle, SessionId, SessionOutcome, SessionState,
    SessionUpdate, StreamSession,
};
