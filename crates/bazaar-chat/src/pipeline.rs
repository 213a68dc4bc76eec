//! Message pipeline: validation, persistence and fan-out of chat messages.

use std::sync::Arc;

use tracing::{debug, info, warn};

use bazaar_shared::constants::{MAX_ATTACHMENTS, MAX_FILE_SIZE, MAX_PAGE_SIZE, MAX_TEXT_LEN};
use bazaar_shared::types::{ChatId, MessageId, UserId};
use bazaar_store::{Chat, Message, MessageStatus, NewMessage, Payload};

use crate::dispatch::{self, NotificationSink};
use crate::error::{ChatError, Denial, Result};
use crate::guard::{Operation, ParticipantGuard};
use crate::notifier::Notifier;
use crate::receipts::ReceiptAggregator;
use crate::store::Store;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check a payload against its variant's rules.
pub fn validate(payload: &Payload) -> Result<()> {
    let attachments = payload.attachments();
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(invalid(format!(
            "too many attachments: {} (max {MAX_ATTACHMENTS})",
            attachments.len()
        )));
    }
    if attachments.iter().any(|a| a.trim().is_empty()) {
        return Err(invalid("empty attachment reference"));
    }

    match payload {
        Payload::Text { text, attachments } => {
            if text.len() > MAX_TEXT_LEN {
                return Err(invalid(format!(
                    "text too long: {} bytes (max {MAX_TEXT_LEN})",
                    text.len()
                )));
            }
            if text.trim().is_empty() && attachments.is_empty() {
                return Err(invalid("text message is empty"));
            }
        }
        Payload::Voice {
            duration_seconds,
            attachments,
        }
        | Payload::Video {
            duration_seconds,
            attachments,
        } => {
            if !duration_seconds.is_finite() || *duration_seconds <= 0.0 {
                return Err(invalid(format!("invalid duration: {duration_seconds}")));
            }
            if attachments.is_empty() {
                return Err(invalid("media message has no attachment"));
            }
        }
        Payload::Attachment { file, .. } => {
            if file.name.trim().is_empty() {
                return Err(invalid("attachment has no file name"));
            }
            if file.size > MAX_FILE_SIZE {
                return Err(invalid(format!(
                    "file too large: {} bytes (max {MAX_FILE_SIZE})",
                    file.size
                )));
            }
        }
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> ChatError {
    ChatError::ValidationFailed(reason.into())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MessagePipeline {
    store: Store,
    guard: ParticipantGuard,
    notifier: Arc<Notifier>,
    receipts: ReceiptAggregator,
    sink: Arc<dyn NotificationSink>,
}

impl MessagePipeline {
    pub fn new(
        store: Store,
        guard: ParticipantGuard,
        notifier: Arc<Notifier>,
        receipts: ReceiptAggregator,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            guard,
            notifier,
            receipts,
            sink,
        }
    }

    /// Validate and persist a new message.
    ///
    /// The message is `Sent` once the store commits it. If the store
    /// fails, the error carries the message in `Failed` status; it is
    /// never retried here.
    pub fn send(&self, chat_id: &ChatId, sender: &UserId, payload: Payload) -> Result<Message> {
        let chat = self.guard.check(sender, chat_id, Operation::Write)?;
        validate(&payload)?;

        let new = NewMessage {
            id: MessageId::new(),
            chat_id: chat_id.clone(),
            sender_id: sender.clone(),
            payload,
        };
        let mut message = provisional(&new, &self.store);

        let stored = match self.store.with(|db| db.insert_message(&new)) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(chat = %chat_id, message = %new.id, error = %e, "send failed");
                message.status = MessageStatus::Failed;
                return Err(ChatError::SendFailed {
                    message: Box::new(message),
                    reason: e.to_string(),
                });
            }
        };
        debug!(chat = %chat_id, message = %stored.id, kind = stored.kind.as_str(), "message sent");

        // Sending restores soft-deleted chats and bumps `updated_at`.
        let chat = self.store.load_chat(chat_id).unwrap_or(chat);
        self.fan_out(&chat, &stored);
        Ok(stored)
    }

    /// Replace the text of a Text message. Only its sender may edit it.
    pub fn edit(
        &self,
        actor: &UserId,
        chat_id: &ChatId,
        message_id: MessageId,
        text: String,
    ) -> Result<Message> {
        let chat = self.guard.check(actor, chat_id, Operation::Write)?;
        let message = self.store.load_message(chat_id, message_id)?;
        if &message.sender_id != actor {
            return Err(Denial::NotSender.into());
        }

        let attachments = match &message.payload {
            None => return Err(ChatError::Conflict(format!("message {message_id} was deleted"))),
            Some(Payload::Text { attachments, .. }) => attachments.clone(),
            Some(other) => {
                return Err(invalid(format!(
                    "{} messages cannot be edited",
                    other.kind().as_str()
                )))
            }
        };
        let payload = Payload::Text { text, attachments };
        validate(&payload)?;

        self.store.with(|db| db.edit_message(message_id, &payload))?;
        let edited = self.store.load_message(chat_id, message_id)?;
        debug!(chat = %chat_id, message = %message_id, "message edited");

        self.notifier.publish_message(&chat, &edited);
        Ok(edited)
    }

    /// Replace a message's content with a tombstone. Id, timestamp and read
    /// receipts survive. Deleting twice is a no-op.
    pub fn delete(&self, actor: &UserId, chat_id: &ChatId, message_id: MessageId) -> Result<Message> {
        let chat = self.guard.check(actor, chat_id, Operation::Delete)?;
        let message = self.store.load_message(chat_id, message_id)?;
        if &message.sender_id != actor {
            return Err(Denial::NotSender.into());
        }

        if !self.store.with(|db| db.tombstone_message(message_id))? {
            return Ok(message);
        }
        let deleted = self.store.load_message(chat_id, message_id)?;
        debug!(chat = %chat_id, message = %message_id, "message deleted");

        self.notifier.publish_message(&chat, &deleted);
        Ok(deleted)
    }

    /// Record that a recipient's device received the message. The status
    /// only ever moves from `Sent` to `Delivered`; anything else is left
    /// as is.
    pub fn ack_delivery(
        &self,
        actor: &UserId,
        chat_id: &ChatId,
        message_id: MessageId,
    ) -> Result<Message> {
        let chat = self.guard.check(actor, chat_id, Operation::Read)?;
        let message = self.store.load_message(chat_id, message_id)?;
        if &message.sender_id == actor {
            return Ok(message);
        }

        let advanced = self.store.with(|db| {
            db.advance_status(message_id, MessageStatus::Sent, MessageStatus::Delivered)
        })?;
        if !advanced {
            return Ok(message);
        }

        let delivered = self.store.load_message(chat_id, message_id)?;
        self.notifier.publish_message(&chat, &delivered);
        Ok(delivered)
    }

    /// One page of history, oldest first. `before` is an exclusive cursor;
    /// `limit` is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn history(
        &self,
        actor: &UserId,
        chat_id: &ChatId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.guard.check(actor, chat_id, Operation::Read)?;
        let cursor = match before {
            Some(id) => Some(self.store.load_message(chat_id, id)?.order_key()),
            None => None,
        };
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        self.store
            .with(|db| db.messages_for_chat(chat_id, cursor, limit))
    }

    fn fan_out(&self, chat: &Chat, message: &Message) {
        self.notifier.publish_message(chat, message);
        self.notifier.publish_chat(chat);
        for user in chat.participants.iter().filter(|u| **u != message.sender_id) {
            self.receipts.publish_unread(&chat.id, user);
        }

        for notification in dispatch::plan(chat, message, self.store.now()) {
            self.sink.dispatch(notification);
        }
        info!(chat = %chat.id, message = %message.id, "message dispatched");
    }
}

/// The in-flight view of a message before the store has confirmed it.
fn provisional(new: &NewMessage, store: &Store) -> Message {
    let now = store.now();
    Message {
        id: new.id,
        chat_id: new.chat_id.clone(),
        sender_id: new.sender_id.clone(),
        kind: new.payload.kind(),
        payload: Some(new.payload.clone()),
        status: MessageStatus::Sending,
        read_by: [(new.sender_id.clone(), now)].into_iter().collect(),
        created_at: now,
        edited_at: None,
        deleted_at: None,
    }
}
