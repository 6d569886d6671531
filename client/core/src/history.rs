//! Conversation History Assembly
//!
//! Builds the bounded message-history payload that accompanies each chat
//! request. The full conversation log lives with the caller (the UI layer
//! persists it); this module only decides what subset of it goes on the wire.
//!
//! # Rules
//!
//! - Only user and assistant turns are sent upstream. System and transient
//!   status entries in the log are local presentation concerns.
//! - If the log already ends with a user message identical to the text being
//!   submitted, that entry is dropped: the text travels once, as the
//!   `message` field of the request, never echoed again inside `messages`.
//! - Exactly one system instruction message is prepended, sourced from
//!   configuration, regardless of what the caller's log contains.
//!
//! Assembly is a pure function of its inputs so it can be tested without any
//! session or transport in play.

use serde::{Deserialize, Serialize};

// ============================================================================
// Message Types
// ============================================================================

/// Who authored a conversation message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instruction message injected by the client
    System,
    /// Message typed by the user
    User,
    /// Message generated by the model
    Assistant,
}

/// A single message in the conversation log
///
/// Immutable once created. The history assembler reads these by reference;
/// it never mutates the caller's log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
}

impl ConversationMessage {
    /// Create a new message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Shorthand for a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Shorthand for an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Shorthand for a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

// ============================================================================
// History Payload
// ============================================================================

/// The assembled payload for one chat request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryPayload {
    /// The message the user is submitting now
    pub current: String,
    /// Prior conversation turns, system instruction first
    pub prior: Vec<ConversationMessage>,
}

impl HistoryPayload {
    /// Number of prior messages (including the system instruction)
    #[must_use]
    pub fn prior_len(&self) -> usize {
        self.prior.len()
    }
}

/// Assemble the history payload for a new outgoing message.
///
/// `full_log` is the caller's complete conversation log in chronological
/// order; `new_user_text` is the message about to be sent; `system_prompt`
/// is the fixed instruction from configuration.
#[must_use]
pub fn assemble(
    full_log: &[ConversationMessage],
    new_user_text: &str,
    system_prompt: &str,
) -> HistoryPayload {
    let mut prior: Vec<ConversationMessage> = full_log
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .cloned()
        .collect();

    // The just-typed message may already have been appended to the log by the
    // caller. It travels as `current`, so drop the duplicate tail entry.
    if let Some(last) = prior.last() {
        if last.role == MessageRole::User && last.content == new_user_text {
            prior.pop();
        }
    }

    prior.insert(0, ConversationMessage::system(system_prompt));

    HistoryPayload {
        current: new_user_text.to_string(),
        prior,
    }
}
