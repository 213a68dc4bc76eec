//! Per-participant chat options and membership management.
//!
//! Each participant writes only their own key in the mute, block and
//! delete maps, so concurrent changes by different users never conflict.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};

use bazaar_shared::types::{ChatId, UserId};
use bazaar_store::{Chat, ChatKind, MuteUntil, Removal};

use crate::error::{ChatError, Result};
use crate::guard::{Operation, ParticipantGuard};
use crate::notifier::Notifier;
use crate::store::Store;

#[derive(Clone)]
pub struct ChatOptions {
    store: Store,
    guard: ParticipantGuard,
    notifier: Arc<Notifier>,
}

impl ChatOptions {
    pub fn new(store: Store, guard: ParticipantGuard, notifier: Arc<Notifier>) -> Self {
        Self {
            store,
            guard,
            notifier,
        }
    }

    /// Mute the chat for `duration` from now, or indefinitely with `None`.
    /// A later call replaces the earlier mute rather than extending it.
    pub fn mute(&self, chat_id: &ChatId, user: &UserId, duration: Option<Duration>) -> Result<Chat> {
        self.guard.check(user, chat_id, Operation::Mute)?;
        let until = match duration {
            Some(d) if d <= Duration::zero() => {
                return Err(ChatError::ValidationFailed("mute duration must be positive".into()))
            }
            Some(d) => self
                .store
                .now()
                .checked_add_signed(d)
                .map(MuteUntil::Until)
                .ok_or_else(|| ChatError::ValidationFailed("mute duration is out of range".into()))?,
            None => MuteUntil::Indefinite,
        };
        self.store.with(|db| db.set_mute(chat_id, user, until))?;
        debug!(chat = %chat_id, user = %user, ?until, "muted");
        self.publish(chat_id, user)
    }

    pub fn unmute(&self, chat_id: &ChatId, user: &UserId) -> Result<Chat> {
        self.guard.check(user, chat_id, Operation::Mute)?;
        self.store.with(|db| db.clear_mute(chat_id, user))?;
        self.publish(chat_id, user)
    }

    /// Block another participant of this chat. In a Direct chat this stops
    /// them from writing; in any chat it stops their messages from
    /// notifying or restoring the chat for the blocker.
    pub fn block(&self, chat_id: &ChatId, blocker: &UserId, target: &UserId) -> Result<Chat> {
        let chat = self.guard.check(blocker, chat_id, Operation::Block)?;
        check_other_member(&chat, blocker, target)?;

        if self.store.with(|db| db.add_block(chat_id, blocker, target))? {
            info!(chat = %chat_id, blocker = %blocker, blocked = %target, "user blocked");
        }
        self.publish(chat_id, blocker)
    }

    pub fn unblock(&self, chat_id: &ChatId, blocker: &UserId, target: &UserId) -> Result<Chat> {
        self.guard.check(blocker, chat_id, Operation::Block)?;
        if self.store.with(|db| db.remove_block(chat_id, blocker, target))? {
            info!(chat = %chat_id, blocker = %blocker, blocked = %target, "user unblocked");
        }
        self.publish(chat_id, blocker)
    }

    /// Hide the chat from `user`'s own list. It comes back on new activity
    /// from someone `user` has not blocked.
    pub fn delete_for_self(&self, chat_id: &ChatId, user: &UserId) -> Result<Chat> {
        self.guard.check(user, chat_id, Operation::Delete)?;
        self.store.with(|db| db.soft_delete_chat(chat_id, user))?;
        debug!(chat = %chat_id, user = %user, "chat deleted for self");
        self.publish(chat_id, user)
    }

    pub fn add_participant(&self, actor: &UserId, chat_id: &ChatId, user: &UserId) -> Result<Chat> {
        let chat = self.guard.check(actor, chat_id, Operation::ManageMembers)?;
        reject_direct(&chat)?;

        if self.store.with(|db| db.add_participant(chat_id, user))? {
            info!(chat = %chat_id, user = %user, by = %actor, "participant added");
        }
        self.publish(chat_id, actor)
    }

    /// Remove a participant. The last participant cannot be removed.
    /// The removed user gets one final update, then loses their open view
    /// of the chat.
    pub fn remove_participant(&self, actor: &UserId, chat_id: &ChatId, user: &UserId) -> Result<Chat> {
        let chat = self.guard.check(actor, chat_id, Operation::ManageMembers)?;
        reject_direct(&chat)?;

        match self.store.with(|db| db.remove_participant(chat_id, user))? {
            Removal::Removed => {}
            Removal::NotAParticipant => {
                return Err(ChatError::NotFound(format!("participant {user} in chat {chat_id}")))
            }
            Removal::LastParticipant => {
                return Err(ChatError::ValidationFailed(
                    "cannot remove the last participant".into(),
                ))
            }
        }
        info!(chat = %chat_id, user = %user, by = %actor, "participant removed");

        let updated = self.store.load_chat(chat_id)?;
        self.notifier.publish_chat(&updated);
        self.notifier.publish_removal(&updated, user);
        if updated.is_participant(actor) {
            Ok(updated.redacted_for(actor))
        } else {
            Ok(updated.redacted_for(user))
        }
    }

    /// Reload, fan out, and return the chat as `viewer` sees it.
    fn publish(&self, chat_id: &ChatId, viewer: &UserId) -> Result<Chat> {
        let chat = self.store.load_chat(chat_id)?;
        self.notifier.publish_chat(&chat);
        Ok(chat.redacted_for(viewer))
    }
}

fn reject_direct(chat: &Chat) -> Result<()> {
    if chat.kind == ChatKind::Direct {
        return Err(ChatError::ValidationFailed(
            "direct chat membership is fixed".into(),
        ));
    }
    Ok(())
}

fn check_other_member(chat: &Chat, actor: &UserId, target: &UserId) -> Result<()> {
    if actor == target {
        return Err(ChatError::ValidationFailed("cannot block yourself".into()));
    }
    if !chat.is_participant(target) {
        return Err(ChatError::NotFound(format!(
            "participant {target} in chat {}",
            chat.id
        )));
    }
    Ok(())
}
