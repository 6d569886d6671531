//! Stream Session
//!
//! One `StreamSession` owns one in-flight chat request: it opens the
//! streaming exchange, drives the frame decoder over the response body,
//! coalesces token arrival into throttled partial updates, supports
//! cooperative mid-stream cancellation, and reconciles to exactly one
//! terminal outcome.
//!
//! # Life-cycle
//!
//! ```text
//!          send()                    Done / EOF
//!  Idle ──────────► Sending ───────────────────────► Finalized
//!                      │
//!                      ├── cancel() ───────────────► Cancelled
//!                      │
//!                      └── connect / HTTP / error frame ──► Failed
//! ```
//!
//! All three terminals are absorbing and a session is never reused: callers
//! create a new session per message. The driver task is structured so that
//! every exit path passes through exactly one terminal transition.
//!
//! # Delivery model
//!
//! Updates arrive on an ordered mpsc channel ending with a single
//! [`SessionUpdate::Finished`]. Partial updates carry the full accumulated
//! text so far, so they never regress; usage telemetry bypasses the
//! coalescing throttle. Text accumulated before a failure or cancellation is
//! always preserved in the outcome: "stop early" never means "discard".

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::{ClientConfig, CoalescePolicy};
use crate::decoder::{FrameDecoder, LineBuffer, StreamEvent, TokenUsage};
use crate::error::ChatError;
use crate::history::{assemble, ConversationMessage};
use crate::relay::{ChatRequest, RelayClient};

/// Update channel depth; the driver backpressures when the caller lags
const UPDATE_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Identifiers and States
// ============================================================================

/// Unique identifier for a session, used for log correlation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Session state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent yet
    Idle,
    /// Request in flight
    Sending,
    /// Completed normally
    Finalized,
    /// Stopped early by the caller
    Cancelled,
    /// Aborted by a connection, HTTP, or protocol error
    Failed,
}

impl SessionState {
    /// Whether this state is absorbing
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled | Self::Failed)
    }
}

/// How a session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Stream completed normally
    Finalized,
    /// Caller cancelled mid-stream
    Cancelled,
    /// Connection, HTTP, or in-band protocol error
    Failed,
}

impl OutcomeKind {
    fn as_state(self) -> SessionState {
        match self {
            Self::Finalized => SessionState::Finalized,
            Self::Cancelled => SessionState::Cancelled,
            Self::Failed => SessionState::Failed,
        }
    }
}

// ============================================================================
// Outcome and Updates
// ============================================================================

/// Terminal result of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    /// How the session ended
    pub kind: OutcomeKind,
    /// Full accumulated text, possibly empty
    pub text: String,
    /// Error description, present only for failed outcomes
    pub error: Option<String>,
}

impl SessionOutcome {
    /// Text suitable for direct display in place of assistant output.
    ///
    /// Partial output wins over an error description: degraded best-effort
    /// text is preferred over hiding generation that already happened. Only
    /// a failure with nothing accumulated shows the error itself.
    #[must_use]
    pub fn display_text(&self) -> &str {
        if !self.text.is_empty() {
            return &self.text;
        }
        match (self.kind, &self.error) {
            (OutcomeKind::Failed, Some(error)) => error,
            _ => "",
        }
    }
}

/// Updates delivered to the caller, in order, ending with `Finished`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Throttled snapshot of the accumulated text so far
    Partial {
        /// Full text accumulated up to this point
        text: String,
    },
    /// Usage telemetry, forwarded immediately when it arrives
    Usage(TokenUsage),
    /// Terminal outcome; sent exactly once, nothing follows it
    Finished(SessionOutcome),
}

// ============================================================================
// Cancellation
// ============================================================================

/// Handle for requesting cooperative cancellation
///
/// Cloneable and cheap; `cancel()` is idempotent. The driver observes the
/// request at its next yield point (between body chunks or while waiting to
/// connect) and tears the connection down, so the session reaches
/// `Cancelled` promptly, not synchronously within the call.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Resolves when cancellation is requested or every handle is gone.
///
/// Dropping all handles counts as cancellation: with no receiver left there
/// is nobody to deliver to, so the driver stops streaming.
async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    loop {
        if rx.changed().await.is_err() || *rx.borrow() {
            return;
        }
    }
}

// ============================================================================
// Coalescing
// ============================================================================

/// Partial-update throttle
///
/// Emits when enough time has passed since the last emission or enough new
/// characters have accumulated, whichever comes first. Both trackers reset
/// on emission.
struct Coalescer {
    policy: CoalescePolicy,
    last_emit: Instant,
    last_emit_chars: usize,
}

impl Coalescer {
    fn new(policy: CoalescePolicy) -> Self {
        Self {
            policy,
            last_emit: Instant::now(),
            last_emit_chars: 0,
        }
    }

    fn should_emit(&mut self, now: Instant, total_chars: usize) -> bool {
        let due = now.duration_since(self.last_emit) >= self.policy.min_interval
            || total_chars - self.last_emit_chars >= self.policy.min_chars;
        if due {
            self.last_emit = now;
            self.last_emit_chars = total_chars;
        }
        due
    }
}

// ============================================================================
// Stream Session
// ============================================================================

/// A single-use streaming chat session
///
/// Takes the configuration as an immutable snapshot at creation time:
/// endpoint changes after that never affect this session.
pub struct StreamSession {
    id: SessionId,
    config: ClientConfig,
    state: Arc<Mutex<SessionState>>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl StreamSession {
    /// Create a session from a configuration snapshot
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            id: SessionId::new(),
            config,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// The session's unique ID
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Get a cancellation handle usable before and during the send
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Start the streaming exchange.
    ///
    /// Assembles the bounded history from `full_log`, opens the connection,
    /// and spawns the driver task. Consumes the session: one send per
    /// session. Must be called within a Tokio runtime.
    ///
    /// Every outcome after this returns, including connect failures and
    /// non-2xx statuses, arrives through the handle's update channel as a
    /// single terminal [`SessionUpdate::Finished`].
    ///
    /// # Errors
    ///
    /// [`ChatError::NotConfigured`] (or a client build failure) when no
    /// request can even be attempted; the session stays `Idle`.
    pub fn send(
        self,
        text: impl Into<String>,
        full_log: &[ConversationMessage],
    ) -> Result<SessionHandle, ChatError> {
        let client = RelayClient::new(&self.config)?;
        let text = text.into();
        let payload = assemble(full_log, &text, &self.config.system_prompt);
        let request = client.request_for(payload);

        *self.state.lock() = SessionState::Sending;
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        let driver = Driver {
            id: self.id,
            client,
            request,
            policy: self.config.coalesce,
            state: Arc::clone(&self.state),
            updates: update_tx,
            cancel_rx: self.cancel_rx.clone(),
        };
        tokio::spawn(driver.run());

        Ok(SessionHandle {
            id: self.id,
            updates: update_rx,
            cancel: CancelHandle {
                tx: Arc::clone(&self.cancel_tx),
            },
            state: Arc::clone(&self.state),
        })
    }
}

// ============================================================================
// Session Handle
// ============================================================================

/// Caller-side handle to an in-flight session
pub struct SessionHandle {
    id: SessionId,
    updates: mpsc::Receiver<SessionUpdate>,
    cancel: CancelHandle,
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    /// The session's unique ID
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state of the session
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Request cancellation of the in-flight request
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Get a cloneable cancellation handle
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Receive the next update; `None` after `Finished` has been consumed
    pub async fn recv(&mut self) -> Option<SessionUpdate> {
        self.updates.recv().await
    }

    /// Convert into a `futures` stream of updates
    #[must_use]
    pub fn into_stream(self) -> ReceiverStream<SessionUpdate> {
        ReceiverStream::new(self.updates)
    }

    /// Drain remaining updates and return the terminal outcome
    pub async fn wait(mut self) -> SessionOutcome {
        while let Some(update) = self.updates.recv().await {
            if let SessionUpdate::Finished(outcome) = update {
                return outcome;
            }
        }
        // Channel closed without a terminal update: the driver task was
        // aborted (runtime shutdown)
        SessionOutcome {
            kind: OutcomeKind::Failed,
            text: String::new(),
            error: Some("session task aborted".to_string()),
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// What to do after applying one decoded event
enum Step {
    Continue,
    Terminal(OutcomeKind, Option<String>),
}

/// The spawned task that owns the connection for one session
struct Driver {
    id: SessionId,
    client: RelayClient,
    request: ChatRequest,
    policy: CoalescePolicy,
    state: Arc<Mutex<SessionState>>,
    updates: mpsc::Sender<SessionUpdate>,
    cancel_rx: watch::Receiver<bool>,
}

impl Driver {
    async fn run(self) {
        let mut accumulated = String::new();
        let (kind, error) = self.stream(&mut accumulated).await;
        self.finish(kind, accumulated, error).await;
    }

    /// Drive the exchange to a terminal decision.
    ///
    /// `accumulated` lives in the caller so partial text survives every
    /// early return.
    async fn stream(&self, accumulated: &mut String) -> (OutcomeKind, Option<String>) {
        let mut cancel_rx = self.cancel_rx.clone();

        // Connection open is a suspension point; cancellation must win here
        // too, not only between chunks.
        let response = tokio::select! {
            biased;
            () = cancel_requested(&mut cancel_rx) => {
                return (OutcomeKind::Cancelled, None);
            }
            response = self.client.open_stream(&self.request) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => return (OutcomeKind::Failed, Some(e.to_string())),
        };

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut decoder = FrameDecoder::new();
        let mut coalescer = Coalescer::new(self.policy);
        let mut total_chars = 0usize;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel_requested(&mut cancel_rx) => {
                    return (OutcomeKind::Cancelled, None);
                }
                chunk = body.next() => chunk,
            };

            match chunk {
                // Plain EOF is normal completion in NDJSON mode
                None => {
                    if let Some(rest) = lines.take_remainder() {
                        if let Some(event) = decoder.decode_line(&rest) {
                            if let Step::Terminal(kind, error) = self
                                .apply_event(event, accumulated, &mut coalescer, &mut total_chars)
                                .await
                            {
                                return (kind, error);
                            }
                        }
                    }
                    return (OutcomeKind::Finalized, None);
                }
                Some(Err(e)) => {
                    // Transport died mid-stream; partial text is preserved
                    return (OutcomeKind::Failed, Some(e.to_string()));
                }
                Some(Ok(bytes)) => {
                    for line in lines.push_chunk(&bytes) {
                        let Some(event) = decoder.decode_line(&line) else {
                            continue;
                        };
                        if let Step::Terminal(kind, error) = self
                            .apply_event(event, accumulated, &mut coalescer, &mut total_chars)
                            .await
                        {
                            return (kind, error);
                        }
                    }
                }
            }
        }
    }

    async fn apply_event(
        &self,
        event: StreamEvent,
        accumulated: &mut String,
        coalescer: &mut Coalescer,
        total_chars: &mut usize,
    ) -> Step {
        match event {
            StreamEvent::Token(token) => {
                *total_chars += token.chars().count();
                accumulated.push_str(&token);
                if coalescer.should_emit(Instant::now(), *total_chars) {
                    let update = SessionUpdate::Partial {
                        text: accumulated.clone(),
                    };
                    if self.updates.send(update).await.is_err() {
                        // Caller dropped the handle; stop streaming
                        return Step::Terminal(OutcomeKind::Cancelled, None);
                    }
                }
                Step::Continue
            }
            StreamEvent::Usage(usage) => {
                // Usage is a single terminal-ish signal, never throttled
                if self.updates.send(SessionUpdate::Usage(usage)).await.is_err() {
                    return Step::Terminal(OutcomeKind::Cancelled, None);
                }
                Step::Continue
            }
            StreamEvent::Error(message) => {
                Step::Terminal(OutcomeKind::Failed, Some(ChatError::Protocol(message).to_string()))
            }
            StreamEvent::Done => Step::Terminal(OutcomeKind::Finalized, None),
        }
    }

    /// The single terminal transition for this session
    async fn finish(&self, kind: OutcomeKind, text: String, error: Option<String>) {
        {
            let mut state = self.state.lock();
            debug_assert!(!state.is_terminal(), "double terminal transition");
            *state = kind.as_state();
        }

        match (&kind, &error) {
            (OutcomeKind::Failed, Some(e)) => {
                tracing::warn!(session = %self.id, len = text.len(), "session failed: {e}");
            }
            _ => {
                tracing::debug!(session = %self.id, len = text.len(), ?kind, "session ended");
            }
        }

        let outcome = SessionOutcome { kind, text, error };
        let _ = self.updates.send(SessionUpdate::Finished(outcome)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    fn policy() -> CoalescePolicy {
        CoalescePolicy {
            min_interval: Duration::from_millis(80),
            min_chars: 48,
        }
    }

    #[test]
    fn coalescer_holds_until_a_threshold_crosses() {
        let mut coalescer = Coalescer::new(policy());
        let base = coalescer.last_emit;

        // Immediately after start: neither threshold crossed
        assert!(!coalescer.should_emit(base + Duration::from_millis(10), 5));
        // Size threshold crossed
        assert!(coalescer.should_emit(base + Duration::from_millis(20), 53));
        // Trackers reset: 40 new chars in 10ms is below both thresholds
        assert!(!coalescer.should_emit(base + Duration::from_millis(30), 93));
        // Time threshold crossed relative to the last emit
        assert!(coalescer.should_emit(base + Duration::from_millis(101), 94));
    }

    #[test]
    fn coalescer_time_threshold_alone_suffices() {
        let mut coalescer = Coalescer::new(policy());
        let base = coalescer.last_emit;
        assert!(coalescer.should_emit(base + Duration::from_millis(80), 1));
    }

    #[test]
    fn display_text_prefers_partial_output() {
        let outcome = SessionOutcome {
            kind: OutcomeKind::Failed,
            text: "partial answer".to_string(),
            error: Some("stream died".to_string()),
        };
        assert_eq!(outcome.display_text(), "partial answer");
    }

    #[test]
    fn display_text_shows_error_only_when_nothing_accumulated() {
        let outcome = SessionOutcome {
            kind: OutcomeKind::Failed,
            text: String::new(),
            error: Some("relay returned HTTP 502: bad gateway".to_string()),
        };
        assert_eq!(outcome.display_text(), "relay returned HTTP 502: bad gateway");

        let cancelled = SessionOutcome {
            kind: OutcomeKind::Cancelled,
            text: String::new(),
            error: None,
        };
        assert_eq!(cancelled.display_text(), "");
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Sending.is_terminal());
        assert!(SessionState::Finalized.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(SessionState::Failed.is_terminal());
    }

    #[test]
    fn outcome_kind_maps_to_state() {
        assert_eq!(OutcomeKind::Finalized.as_state(), SessionState::Finalized);
        assert_eq!(OutcomeKind::Cancelled.as_state(), SessionState::Cancelled);
        assert_eq!(OutcomeKind::Failed.as_state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn send_without_endpoint_fails_fast() {
        let session = StreamSession::new(ClientConfig::default());
        assert_eq!(session.state(), SessionState::Idle);

        let result = session.send("hello", &[]);
        assert!(matches!(result, Err(ChatError::NotConfigured)));
    }

    #[test]
    fn session_ids_are_unique_and_short_in_display() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 8);
    }
}
