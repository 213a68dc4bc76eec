//! Read receipt aggregator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use bazaar_shared::types::{ChatId, MessageId, UserId};
use bazaar_store::ReadReceipt;

use crate::error::Result;
use crate::guard::{Operation, ParticipantGuard};
use crate::notifier::Notifier;
use crate::store::Store;

#[derive(Clone)]
pub struct ReceiptAggregator {
    store: Store,
    guard: ParticipantGuard,
    notifier: Arc<Notifier>,
}

impl ReceiptAggregator {
    pub fn new(store: Store, guard: ParticipantGuard, notifier: Arc<Notifier>) -> Self {
        Self {
            store,
            guard,
            notifier,
        }
    }

    /// Mark every message of the chat up to and including `up_to` as read
    /// by `user`. Receipts only ever move forward, so replays and
    /// out-of-order calls from several devices are harmless.
    ///
    /// Returns the store time written into the new receipts.
    pub fn mark_read(&self, chat_id: &ChatId, user: &UserId, up_to: MessageId) -> Result<DateTime<Utc>> {
        let chat = self.guard.check(user, chat_id, Operation::Read)?;
        let target = self.store.load_message(chat_id, up_to)?;

        let (read_at, newly_read) = self.store.with(|db| {
            let pending = db.unread_through(chat_id, user, &target)?;
            let read_at = db.merge_read_receipts(chat_id, user, &target)?;
            Ok((read_at, pending))
        })?;
        debug!(chat = %chat_id, user = %user, marked = newly_read.len(), "marked read");

        for id in newly_read {
            match self.store.with(|db| db.get_message(id)) {
                Ok(message) => self.notifier.publish_message(&chat, &message),
                Err(e) => warn!(message = %id, error = %e, "skipped receipt update"),
            }
        }
        self.publish_unread(chat_id, user);

        Ok(read_at)
    }

    pub fn unread_count(&self, chat_id: &ChatId, user: &UserId) -> Result<u64> {
        self.guard.check(user, chat_id, Operation::Read)?;
        self.store.with(|db| db.unread_count(chat_id, user))
    }

    /// Who has read `message`, most recent first. Only ids are returned;
    /// display names are the caller's concern.
    pub fn read_receipts(
        &self,
        actor: &UserId,
        chat_id: &ChatId,
        message: MessageId,
    ) -> Result<Vec<ReadReceipt>> {
        self.guard.check(actor, chat_id, Operation::Read)?;
        self.store.load_message(chat_id, message)?;
        self.store.with(|db| db.receipts_for_message(message))
    }

    /// Push `user`'s current unread count. Failures only cost a stale badge.
    pub fn publish_unread(&self, chat_id: &ChatId, user: &UserId) {
        match self.store.with(|db| db.unread_count(chat_id, user)) {
            Ok(count) => self.notifier.publish_unread(chat_id, user, count),
            Err(e) => warn!(chat = %chat_id, user = %user, error = %e, "unread update skipped"),
        }
    }
}
