//! Outbound events for the notification dispatcher.
//!
//! This crate only decides *who* should hear about a message; formatting
//! and delivering push notifications happens elsewhere.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use bazaar_shared::types::{ChatId, MessageId, UserId};
use bazaar_store::{Chat, Message};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundNotification {
    NewMessage {
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: UserId,
        recipients: Vec<UserId>,
    },
    Mentioned {
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: UserId,
        user_id: UserId,
    },
}

/// Receives outbound events. Implementations must not block for long; they
/// run on the sender's request path.
pub trait NotificationSink: Send + Sync {
    fn dispatch(&self, notification: OutboundNotification);
}

/// Logs every event. Used when no dispatcher is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn dispatch(&self, notification: OutboundNotification) {
        match &notification {
            OutboundNotification::NewMessage {
                chat_id,
                message_id,
                recipients,
                ..
            } => info!(
                chat = %chat_id,
                message = %message_id,
                recipients = recipients.len(),
                "new message notification"
            ),
            OutboundNotification::Mentioned {
                chat_id,
                message_id,
                user_id,
                ..
            } => info!(chat = %chat_id, message = %message_id, user = %user_id, "mention notification"),
        }
    }
}

/// Decide which events a freshly sent message produces.
///
/// Push recipients exclude the sender, anyone who blocked the sender in
/// this chat, and anyone with an unexpired mute. Mentions are
/// `@<user id>` tokens naming another participant; they skip blockers but
/// reach muted users.
pub fn plan(chat: &Chat, message: &Message, now: DateTime<Utc>) -> Vec<OutboundNotification> {
    let sender = &message.sender_id;
    let reachable = |user: &&UserId| *user != sender && !chat.has_blocked(user, sender);

    let recipients: Vec<UserId> = chat
        .participants
        .iter()
        .filter(reachable)
        .filter(|user| {
            !chat
                .muted_by
                .get(*user)
                .is_some_and(|mute| mute.is_active(now))
        })
        .cloned()
        .collect();

    let mut events = Vec::new();
    if !recipients.is_empty() {
        events.push(OutboundNotification::NewMessage {
            chat_id: chat.id.clone(),
            message_id: message.id,
            sender_id: sender.clone(),
            recipients,
        });
    }

    let text = message
        .payload
        .as_ref()
        .and_then(|p| p.text())
        .unwrap_or_default();
    for user in mentions(text) {
        if chat.is_participant(&user) && reachable(&&user) {
            events.push(OutboundNotification::Mentioned {
                chat_id: chat.id.clone(),
                message_id: message.id,
                sender_id: sender.clone(),
                user_id: user,
            });
        }
    }

    events
}

/// Distinct `@user` tokens in `text`, in sorted order.
fn mentions(text: &str) -> BTreeSet<UserId> {
    text.split_whitespace()
        .filter_map(|word| word.strip_prefix('@'))
        .map(|name| name.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-'))
        .filter_map(|name| UserId::parse(name).ok())
        .collect()
}
