//! Relay Wire Protocol and HTTP Client
//!
//! The relay server is a thin HTTP proxy in front of the actual model
//! runtime. This module owns the request/response body shapes and the
//! `reqwest` plumbing for its three routes:
//!
//! - `POST /chat` - buffered single response `{"reply": "..."}`
//! - `POST /chat_stream` - newline-delimited frames (see [`crate::decoder`])
//! - `GET /healthz` - `{"status": "...", "model": "..."}` (see
//!   [`crate::health`])
//!
//! Timeouts are asymmetric on purpose: connecting should fail fast, but the
//! response body may legitimately idle for a long time while the model
//! generates.

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::history::{ConversationMessage, HistoryPayload};

/// Streaming chat route
pub const CHAT_STREAM_PATH: &str = "/chat_stream";
/// Buffered chat route
pub const CHAT_PATH: &str = "/chat";
/// Health probe route
pub const HEALTHZ_PATH: &str = "/healthz";

// ============================================================================
// Wire Types
// ============================================================================

/// Request body for `/chat` and `/chat_stream`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The message being submitted now
    pub message: String,
    /// Prior conversation turns; omitted entirely when empty
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub messages: Vec<ConversationMessage>,
    /// Provider hint (e.g. "ollama"); omitted when unset
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider: Option<String>,
}

impl ChatRequest {
    /// Build the wire request from an assembled history payload
    #[must_use]
    pub fn from_payload(payload: HistoryPayload, provider: Option<String>) -> Self {
        Self {
            message: payload.current,
            messages: payload.prior,
            provider,
        }
    }
}

/// Response body of the buffered `/chat` route
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatReply {
    /// The complete assistant reply
    pub reply: String,
}

/// Response body of `/healthz`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthReply {
    /// Server-reported status string (expected: "ok")
    pub status: String,
    /// Name of the model the relay serves
    pub model: String,
}

// ============================================================================
// Relay Client
// ============================================================================

/// HTTP client bound to one relay endpoint
///
/// Cheap to clone (shares the underlying connection pool). Captures the
/// endpoint at construction: a `RelayClient` is a snapshot, endpoint changes
/// require a new client.
#[derive(Clone, Debug)]
pub struct RelayClient {
    base_url: String,
    provider: Option<String>,
    http: reqwest::Client,
}

impl RelayClient {
    /// Create a client from a configuration snapshot.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotConfigured`] when the configuration carries no
    /// endpoint; [`ChatError::Connection`] if the HTTP client cannot be
    /// built.
    pub fn new(config: &ClientConfig) -> Result<Self, ChatError> {
        let base_url = config
            .endpoint
            .as_deref()
            .ok_or(ChatError::NotConfigured)?
            .trim_end_matches('/')
            .to_string();

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            base_url,
            provider: config.provider.clone(),
            http,
        })
    }

    /// The endpoint this client talks to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open the streaming chat exchange.
    ///
    /// Returns the raw response with a verified 2xx status; the caller owns
    /// draining the body. No bytes have been read from the body yet when
    /// this returns.
    ///
    /// # Errors
    ///
    /// [`ChatError::Connection`] if the relay is unreachable,
    /// [`ChatError::HttpStatus`] on a non-2xx answer.
    pub async fn open_stream(&self, request: &ChatRequest) -> Result<reqwest::Response, ChatError> {
        let url = format!("{}{CHAT_STREAM_PATH}", self.base_url);
        tracing::debug!(%url, prior = request.messages.len(), "opening chat stream");

        let response = self
            .http
            .post(&url)
            // NDJSON canonical, JSON for SSE-era servers
            .header(reqwest::header::ACCEPT, "application/x-ndjson, application/json")
            .json(request)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Send a buffered (non-streaming) chat request and return the reply.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`Self::open_stream`]; additionally
    /// [`ChatError::Connection`] if the reply body is not valid JSON.
    pub async fn send_buffered(&self, request: &ChatRequest) -> Result<String, ChatError> {
        let url = format!("{}{CHAT_PATH}", self.base_url);
        tracing::debug!(%url, "sending buffered chat request");

        let response = self.http.post(&url).json(request).send().await?;
        let response = Self::check_status(response).await?;
        let reply: ChatReply = response.json().await?;
        Ok(reply.reply)
    }

    /// Attach the configured provider hint to a history payload
    #[must_use]
    pub fn request_for(&self, payload: HistoryPayload) -> ChatRequest {
        ChatRequest::from_payload(payload, self.provider.clone())
    }

    /// Promote a non-2xx status into `HttpStatus`, capturing the body text
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ChatError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}
