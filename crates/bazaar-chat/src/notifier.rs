//! Realtime notifier.
//!
//! Fans persisted changes out to every open view. Each subscription owns an
//! unbounded channel; the subscriber drains it at its own pace. Updates
//! always carry the whole entity rather than a diff, so applying one twice
//! or out of order converges on the same view.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use bazaar_shared::types::{ChatId, SubscriptionId, UserId};
use bazaar_store::{Chat, Message};

use crate::presence::PresenceView;

/// What a view watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Chat list: metadata, messages and unread counters of every chat the
    /// viewer participates in.
    User(UserId),
    /// Open conversation: messages, typing set and metadata of one chat.
    Chat(ChatId),
    /// One user's presence.
    Presence(UserId),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    /// Chat metadata, redacted for the receiving viewer.
    Chat { chat: Chat },
    Message { message: Message },
    /// Users currently typing (already TTL-filtered).
    Typing { chat_id: ChatId, users: Vec<UserId> },
    /// Unread count of the receiving viewer.
    Unread { chat_id: ChatId, count: u64 },
    Presence { presence: PresenceView },
}

/// Receiving half of a subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub updates: mpsc::UnboundedReceiver<Update>,
}

struct Subscriber {
    viewer: UserId,
    scope: Scope,
    tx: mpsc::UnboundedSender<Update>,
}

#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view. Authorization is the caller's job.
    pub fn subscribe(&self, viewer: UserId, scope: Scope) -> Subscription {
        let (tx, updates) = mpsc::unbounded_channel();
        let id = SubscriptionId::new();

        debug!(subscription = %id, user = %viewer, ?scope, "subscribed");
        self.lock().insert(id, Subscriber { viewer, scope, tx });

        Subscription { id, updates }
    }

    /// Tear down a subscription. Returns `false` if it was already gone;
    /// unsubscribing twice is harmless.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    pub fn publish_chat(&self, chat: &Chat) {
        self.fan_out(|sub| {
            let watches = match &sub.scope {
                Scope::User(user) => user == &sub.viewer && chat.is_participant(user),
                Scope::Chat(id) => id == &chat.id && chat.is_participant(&sub.viewer),
                Scope::Presence(_) => false,
            };
            watches.then(|| Update::Chat {
                chat: chat.redacted_for(&sub.viewer),
            })
        });
    }

    /// Tell `removed` they left `chat`, then close their conversation
    /// views of it. Their chat-list subscription stays open.
    pub fn publish_removal(&self, chat: &Chat, removed: &UserId) {
        let snapshot = chat.redacted_for(removed);
        self.lock().retain(|id, sub| {
            if &sub.viewer != removed {
                return true;
            }
            let (notify, keep) = match &sub.scope {
                Scope::User(user) => (user == removed, true),
                Scope::Chat(chat_id) => (chat_id == &chat.id, chat_id != &chat.id),
                Scope::Presence(_) => (false, true),
            };
            let delivered = !notify
                || sub
                    .tx
                    .send(Update::Chat {
                        chat: snapshot.clone(),
                    })
                    .is_ok();
            if !keep {
                debug!(subscription = %id, user = %removed, chat = %chat.id, "closing view of left chat");
            }
            keep && delivered
        });
    }

    pub fn publish_message(&self, chat: &Chat, message: &Message) {
        self.fan_out(|sub| {
            let watches = match &sub.scope {
                Scope::User(user) => user == &sub.viewer && chat.is_participant(user),
                Scope::Chat(id) => id == &chat.id && chat.is_participant(&sub.viewer),
                Scope::Presence(_) => false,
            };
            watches.then(|| Update::Message {
                message: message.clone(),
            })
        });
    }

    pub fn publish_typing(&self, chat: &Chat, users: &[UserId]) {
        self.fan_out(|sub| {
            let watches = matches!(&sub.scope, Scope::Chat(id) if id == &chat.id)
                && chat.is_participant(&sub.viewer);
            watches.then(|| Update::Typing {
                chat_id: chat.id.clone(),
                users: users.to_vec(),
            })
        });
    }

    /// Deliver `user`'s own unread count; nobody else sees it.
    pub fn publish_unread(&self, chat_id: &ChatId, user: &UserId, count: u64) {
        self.fan_out(|sub| {
            let watches = &sub.viewer == user
                && match &sub.scope {
                    Scope::User(u) => u == user,
                    Scope::Chat(id) => id == chat_id,
                    Scope::Presence(_) => false,
                };
            watches.then(|| Update::Unread {
                chat_id: chat_id.clone(),
                count,
            })
        });
    }

    pub fn publish_presence(&self, presence: &PresenceView) {
        self.fan_out(|sub| {
            let watches = matches!(&sub.scope, Scope::Presence(u) if u == &presence.user_id);
            watches.then(|| Update::Presence {
                presence: presence.clone(),
            })
        });
    }

    /// Send to every matching subscriber and prune those whose receiver was
    /// dropped.
    fn fan_out(&self, mut select: impl FnMut(&Subscriber) -> Option<Update>) {
        let mut subscribers = self.lock();
        let mut closed = Vec::new();

        for (id, sub) in subscribers.iter() {
            if let Some(update) = select(sub) {
                if sub.tx.send(update).is_err() {
                    closed.push(*id);
                }
            }
        }

        for id in closed {
            trace!(subscription = %id, "pruning closed subscription");
            subscribers.remove(&id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
