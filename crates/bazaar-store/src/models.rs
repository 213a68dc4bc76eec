//! Documents persisted in the backing store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to subscribers and the HTTP layer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_shared::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Direct,
    JobScoped,
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::JobScoped => "job_scoped",
            Self::Group => "group",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "job_scoped" => Some(Self::JobScoped),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// How long a participant has silenced a chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MuteUntil {
    Until(DateTime<Utc>),
    Indefinite,
}

impl MuteUntil {
    /// Expiry is judged at read time; an expired mute is simply ignored.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Until(until) => now < *until,
            Self::Indefinite => true,
        }
    }
}

/// A conversation container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    /// Never empty. Exactly two members for Direct chats.
    pub participants: BTreeSet<UserId>,
    pub muted_by: BTreeMap<UserId, MuteUntil>,
    /// blocker -> users they blocked in this chat. Private to the blocker.
    pub blocked_users: BTreeMap<UserId, BTreeSet<UserId>>,
    /// Participants that removed the chat from their own list.
    pub deleted_by: BTreeMap<UserId, DateTime<Utc>>,
    /// Raw typing timestamps. Readers must apply the TTL.
    pub typing: BTreeMap<UserId, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Last activity; orders the chat list.
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// Whether `blocker` has blocked `target` in this chat.
    pub fn has_blocked(&self, blocker: &UserId, target: &UserId) -> bool {
        self.blocked_users
            .get(blocker)
            .is_some_and(|blocked| blocked.contains(target))
    }

    /// The other member of a Direct chat.
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        if self.kind != ChatKind::Direct || !self.is_participant(user) {
            return None;
        }
        self.participants.iter().find(|p| *p != user)
    }

    pub fn is_active_for(&self, user: &UserId) -> bool {
        self.is_participant(user) && !self.deleted_by.contains_key(user)
    }

    /// Copy of this chat with other participants' private entries removed.
    pub fn redacted_for(&self, viewer: &UserId) -> Chat {
        let own = |k: &UserId| k == viewer;
        Chat {
            muted_by: self
                .muted_by
                .iter()
                .filter(|(k, _)| own(k))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            blocked_users: self
                .blocked_users
                .iter()
                .filter(|(k, _)| own(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            deleted_by: self
                .deleted_by
                .iter()
                .filter(|(k, _)| own(k))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            ..self.clone()
        }
    }
}

/// Outcome of removing a participant from a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    NotAParticipant,
    /// Refused: a chat always keeps at least one participant.
    LastParticipant,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Voice,
    Video,
    Attachment,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
            Self::Video => "video",
            Self::Attachment => "attachment",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "voice" => Some(Self::Voice),
            "video" => Some(Self::Video),
            "attachment" => Some(Self::Attachment),
            _ => None,
        }
    }
}

/// Name, size and MIME type of an attached file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime: String,
}

/// Message content, one variant per message type.
///
/// `attachments` are ordered references issued by media storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Text {
        text: String,
        #[serde(default)]
        attachments: Vec<String>,
    },
    Voice {
        duration_seconds: f64,
        attachments: Vec<String>,
    },
    Video {
        duration_seconds: f64,
        attachments: Vec<String>,
    },
    Attachment {
        file: FileMetadata,
        #[serde(default)]
        attachments: Vec<String>,
    },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Voice { .. } => MessageKind::Voice,
            Self::Video { .. } => MessageKind::Video,
            Self::Attachment { .. } => MessageKind::Attachment,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn attachments(&self) -> &[String] {
        match self {
            Self::Text { attachments, .. }
            | Self::Voice { attachments, .. }
            | Self::Video { attachments, .. }
            | Self::Attachment { attachments, .. } => attachments,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A message as submitted for persistence; the store assigns `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub payload: Payload,
}

/// A single chat message. Ordered within its chat by `(created_at, id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    /// `None` once the sender deleted the message (tombstone).
    pub payload: Option<Payload>,
    pub status: MessageStatus,
    /// user -> when they last read up through this message.
    pub read_by: BTreeMap<UserId, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    /// Total-order key within a chat.
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }
}

/// One entry of a message's `read_by` map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Online,
    Offline,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Stored presence of one user. `state` is what the client last reported;
/// readers must also apply the presence TTL to `last_seen`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub state: PresenceState,
    pub last_seen: DateTime<Utc>,
}
