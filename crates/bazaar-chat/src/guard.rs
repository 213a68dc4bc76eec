//! Participant guard.
//!
//! Every read, write, mute, block and delete is checked here first. The
//! rules are evaluated in priority order:
//!
//! 1. the actor must be a participant, else [`Denial::NotAMember`];
//! 2. in a Direct chat, if the counterpart has blocked the actor, writes are
//!    refused with [`Denial::Blocked`] while reads of existing history stay
//!    allowed.
//!
//! A local soft-delete is not a guard concern: it only hides the chat from
//! the actor's list.

use bazaar_shared::types::{ChatId, UserId};
use bazaar_store::{Chat, ChatKind};

use crate::error::{Denial, Result};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// History, receipts, typing state, subscriptions, read marks.
    Read,
    /// New messages, edits, typing signals.
    Write,
    Mute,
    Block,
    /// Local chat deletion and message tombstoning.
    Delete,
    /// Adding or removing participants of a job or group chat.
    ManageMembers,
}

/// Pure authorization predicate over a loaded chat.
pub fn authorize(chat: &Chat, actor: &UserId, op: Operation) -> std::result::Result<(), Denial> {
    if !chat.is_participant(actor) {
        return Err(Denial::NotAMember);
    }

    if op == Operation::Write && chat.kind == ChatKind::Direct {
        if let Some(other) = chat.counterpart(actor) {
            if chat.has_blocked(other, actor) {
                return Err(Denial::Blocked);
            }
        }
    }

    Ok(())
}

/// Loads the chat and applies [`authorize`].
#[derive(Clone)]
pub struct ParticipantGuard {
    store: Store,
}

impl ParticipantGuard {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Returns the chat the actor was authorized against so callers do not
    /// need a second read.
    pub fn check(&self, actor: &UserId, chat_id: &ChatId, op: Operation) -> Result<Chat> {
        let chat = self.store.load_chat(chat_id)?;
        if let Err(denial) = authorize(&chat, actor, op) {
            tracing::debug!(chat = %chat_id, user = %actor, ?op, %denial, "guard denied");
            return Err(denial.into());
        }
        Ok(chat)
    }
}
