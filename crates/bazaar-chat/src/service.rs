//! The consumer-facing facade over every chat component.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use bazaar_shared::constants::{PRESENCE_TTL, TYPING_TTL};
use bazaar_shared::types::{ChatId, MessageId, SubscriptionId, UserId};
use bazaar_store::{Chat, Database, Message, Payload, ReadReceipt};

use crate::dispatch::{NotificationSink, TracingSink};
use crate::error::{ChatError, Result};
use crate::guard::{Operation, ParticipantGuard};
use crate::notifier::{Notifier, Scope, Subscription};
use crate::options::ChatOptions;
use crate::pipeline::MessagePipeline;
use crate::presence::{PresenceTracker, PresenceView};
use crate::receipts::ReceiptAggregator;
use crate::resolver::{ChatContext, ChatResolver};
use crate::store::Store;
use crate::typing::TypingIndicators;

/// Staleness windows applied at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    pub typing_ttl: Duration,
    pub presence_ttl: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::seconds(TYPING_TTL.as_secs() as i64),
            presence_ttl: Duration::seconds(PRESENCE_TTL.as_secs() as i64),
        }
    }
}

/// A chat-list entry: the chat as the viewer sees it plus their unread count.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub unread: u64,
}

#[derive(Clone)]
pub struct ChatService {
    store: Store,
    guard: ParticipantGuard,
    notifier: Arc<Notifier>,
    resolver: ChatResolver,
    pipeline: MessagePipeline,
    receipts: ReceiptAggregator,
    typing: TypingIndicators,
    presence: PresenceTracker,
    options: ChatOptions,
}

impl ChatService {
    /// Wire every component over one database. Outbound push events go to
    /// `sink`.
    pub fn new(db: Database, settings: ChatSettings, sink: Arc<dyn NotificationSink>) -> Self {
        let store = Store::new(db);
        let guard = ParticipantGuard::new(store.clone());
        let notifier = Arc::new(Notifier::new());

        let receipts = ReceiptAggregator::new(store.clone(), guard.clone(), notifier.clone());
        let pipeline = MessagePipeline::new(
            store.clone(),
            guard.clone(),
            notifier.clone(),
            receipts.clone(),
            sink,
        );

        Self {
            resolver: ChatResolver::new(store.clone(), notifier.clone()),
            typing: TypingIndicators::new(
                store.clone(),
                guard.clone(),
                notifier.clone(),
                settings.typing_ttl,
            ),
            presence: PresenceTracker::new(store.clone(), notifier.clone(), settings.presence_ttl),
            options: ChatOptions::new(store.clone(), guard.clone(), notifier.clone()),
            pipeline,
            receipts,
            notifier,
            guard,
            store,
        }
    }

    /// Default settings and a logging notification sink.
    pub fn with_defaults(db: Database) -> Self {
        Self::new(db, ChatSettings::default(), Arc::new(TracingSink))
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    // ------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------

    pub fn resolve_chat(&self, actor: &UserId, context: ChatContext) -> Result<Chat> {
        self.resolver.resolve(actor, context)
    }

    pub fn chat(&self, actor: &UserId, chat_id: &ChatId) -> Result<Chat> {
        let chat = self.guard.check(actor, chat_id, Operation::Read)?;
        Ok(chat.redacted_for(actor))
    }

    /// The actor's visible chats, most recently active first.
    pub fn list_chats(&self, actor: &UserId) -> Result<Vec<ChatSummary>> {
        self.store.with(|db| {
            db.list_chats_for_user(actor)?
                .into_iter()
                .map(|chat| -> bazaar_store::Result<ChatSummary> {
                    let unread = db.unread_count(&chat.id, actor)?;
                    Ok(ChatSummary {
                        chat: chat.redacted_for(actor),
                        unread,
                    })
                })
                .collect()
        })
    }

    pub fn mute_chat(&self, chat_id: &ChatId, user: &UserId, duration: Option<Duration>) -> Result<Chat> {
        self.options.mute(chat_id, user, duration)
    }

    pub fn unmute_chat(&self, chat_id: &ChatId, user: &UserId) -> Result<Chat> {
        self.options.unmute(chat_id, user)
    }

    pub fn block_user(&self, chat_id: &ChatId, blocker: &UserId, target: &UserId) -> Result<Chat> {
        self.options.block(chat_id, blocker, target)
    }

    pub fn unblock_user(&self, chat_id: &ChatId, blocker: &UserId, target: &UserId) -> Result<Chat> {
        self.options.unblock(chat_id, blocker, target)
    }

    pub fn delete_chat_for_self(&self, chat_id: &ChatId, user: &UserId) -> Result<Chat> {
        self.options.delete_for_self(chat_id, user)
    }

    pub fn add_participant(&self, actor: &UserId, chat_id: &ChatId, user: &UserId) -> Result<Chat> {
        self.options.add_participant(actor, chat_id, user)
    }

    pub fn remove_participant(&self, actor: &UserId, chat_id: &ChatId, user: &UserId) -> Result<Chat> {
        self.options.remove_participant(actor, chat_id, user)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub fn send_message(&self, chat_id: &ChatId, sender: &UserId, payload: Payload) -> Result<Message> {
        self.pipeline.send(chat_id, sender, payload)
    }

    pub fn edit_message(
        &self,
        actor: &UserId,
        chat_id: &ChatId,
        message_id: MessageId,
        text: String,
    ) -> Result<Message> {
        self.pipeline.edit(actor, chat_id, message_id, text)
    }

    pub fn delete_message(&self, actor: &UserId, chat_id: &ChatId, message_id: MessageId) -> Result<Message> {
        self.pipeline.delete(actor, chat_id, message_id)
    }

    pub fn ack_delivery(&self, actor: &UserId, chat_id: &ChatId, message_id: MessageId) -> Result<Message> {
        self.pipeline.ack_delivery(actor, chat_id, message_id)
    }

    pub fn history(
        &self,
        actor: &UserId,
        chat_id: &ChatId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.pipeline.history(actor, chat_id, before, limit)
    }

    // ------------------------------------------------------------------
    // Receipts and typing
    // ------------------------------------------------------------------

    pub fn mark_read(&self, chat_id: &ChatId, user: &UserId, up_to: MessageId) -> Result<DateTime<Utc>> {
        self.receipts.mark_read(chat_id, user, up_to)
    }

    pub fn unread_count(&self, chat_id: &ChatId, user: &UserId) -> Result<u64> {
        self.receipts.unread_count(chat_id, user)
    }

    pub fn read_receipts(&self, actor: &UserId, chat_id: &ChatId, message_id: MessageId) -> Result<Vec<ReadReceipt>> {
        self.receipts.read_receipts(actor, chat_id, message_id)
    }

    pub fn set_typing(&self, chat_id: &ChatId, user: &UserId, is_typing: bool) -> Result<()> {
        self.typing.set_typing(chat_id, user, is_typing)
    }

    pub fn typing_users(&self, chat_id: &ChatId, viewer: &UserId) -> Result<Vec<UserId>> {
        self.typing.typing_users(chat_id, viewer)
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    pub fn connect(&self, user: &UserId) -> Result<PresenceView> {
        self.presence.connect(user)
    }

    pub fn heartbeat(&self, user: &UserId) {
        self.presence.heartbeat(user)
    }

    pub fn disconnect(&self, user: &UserId) -> Result<PresenceView> {
        self.presence.disconnect(user)
    }

    pub fn presence(&self, user: &UserId) -> Result<PresenceView> {
        self.presence.presence(user)
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Open a view. A chat scope requires read access; a user scope can
    /// only watch the viewer's own chat list.
    pub fn subscribe(&self, viewer: &UserId, scope: Scope) -> Result<Subscription> {
        match &scope {
            Scope::Chat(chat_id) => {
                self.guard.check(viewer, chat_id, Operation::Read)?;
            }
            Scope::User(user) if user != viewer => {
                return Err(ChatError::ValidationFailed(
                    "a user scope can only watch the viewer's own chats".into(),
                ));
            }
            Scope::User(_) | Scope::Presence(_) => {}
        }
        Ok(self.notifier.subscribe(viewer.clone(), scope))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }
}
