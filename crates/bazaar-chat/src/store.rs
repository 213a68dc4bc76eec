//! Shared handle to the backing store.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use bazaar_shared::clock::Clock;
use bazaar_shared::types::{ChatId, MessageId};
use bazaar_store::{Chat, Database, Message, StoreError};

use crate::error::{ChatError, Result};

/// Cloneable handle around the single database connection. Every core
/// component holds one of these instead of reaching for a global.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
    clock: Arc<dyn Clock>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        let clock = db.clock();
        Self {
            db: Arc::new(Mutex::new(db)),
            clock,
        }
    }

    /// Run `f` against the database. A poisoned lock or a store error
    /// becomes a [`ChatError`].
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut Database) -> bazaar_store::Result<T>,
    ) -> Result<T> {
        let mut db = self
            .db
            .lock()
            .map_err(|e| ChatError::Transient(format!("Lock poisoned: {e}")))?;
        f(&mut db).map_err(ChatError::from)
    }

    /// Store time at millisecond precision, read without taking the lock.
    pub fn now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }

    pub fn load_chat(&self, id: &ChatId) -> Result<Chat> {
        self.with(|db| db.get_chat(id)).map_err(|e| match e {
            ChatError::NotFound(_) => ChatError::NotFound(format!("chat {id}")),
            other => other,
        })
    }

    /// Load a message and check that it belongs to `chat`.
    pub fn load_message(&self, chat: &ChatId, id: MessageId) -> Result<Message> {
        let message = self.with(|db| db.get_message(id)).map_err(|e| match e {
            ChatError::NotFound(_) => ChatError::NotFound(format!("message {id}")),
            other => other,
        })?;
        if &message.chat_id != chat {
            return Err(ChatError::NotFound(format!("message {id} in chat {chat}")));
        }
        Ok(message)
    }

    /// Like [`Store::with`] but maps `NotFound` to `None`.
    pub fn find<T>(
        &self,
        f: impl FnOnce(&mut Database) -> bazaar_store::Result<T>,
    ) -> Result<Option<T>> {
        let mut db = self
            .db
            .lock()
            .map_err(|e| ChatError::Transient(format!("Lock poisoned: {e}")))?;
        match f(&mut db) {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
