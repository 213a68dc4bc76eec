use serde::Serialize;
use thiserror::Error;

use bazaar_shared::error::IdError;
use bazaar_store::{Message, StoreError};

/// Why the participant guard refused an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    /// The actor is not in the chat's participant set.
    NotAMember,
    /// The Direct-chat counterpart has blocked the actor; writes are refused.
    Blocked,
    /// Only the sender may change a message's content.
    NotSender,
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::NotAMember => f.write_str("not a member of this chat"),
            Denial::Blocked => f.write_str("blocked by the other participant"),
            Denial::NotSender => f.write_str("only the sender may modify this message"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ChatError {
    /// Guard denial. Never retried.
    #[error("Unauthorized: {0}")]
    Unauthorized(Denial),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed payload or request. Never retried.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Backing-store failure. Retrying is the caller's decision.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Persistence of a new message failed. Carries the message in
    /// `Failed` status so the UI can offer a manual retry.
    #[error("Message could not be sent: {reason}")]
    SendFailed {
        message: Box<Message>,
        reason: String,
    },
}

impl ChatError {
    /// Whether the caller may reasonably retry the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Transient(_) | ChatError::SendFailed { .. })
    }
}

impl From<Denial> for ChatError {
    fn from(denial: Denial) -> Self {
        ChatError::Unauthorized(denial)
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ChatError::NotFound("record".to_string()),
            other => ChatError::Transient(other.to_string()),
        }
    }
}

impl From<IdError> for ChatError {
    fn from(e: IdError) -> Self {
        ChatError::ValidationFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_classify() {
        assert!(matches!(
            ChatError::from(StoreError::NotFound),
            ChatError::NotFound(_)
        ));
        let busy = ChatError::from(StoreError::Migration("locked".into()));
        assert!(busy.is_transient());
        assert!(!ChatError::from(Denial::Blocked).is_transient());
    }
}
