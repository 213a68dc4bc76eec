//! Raw typing entries. Staleness is judged by readers, so nothing here
//! ever sweeps old rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use bazaar_shared::types::{ChatId, UserId};

use crate::chats::user_col;
use crate::database::{from_millis, to_millis, Database};
use crate::error::Result;

impl Database {
    /// Stamp `user` as typing now. Last write wins per user.
    pub fn touch_typing(&self, chat: &ChatId, user: &UserId) -> Result<DateTime<Utc>> {
        let now = self.now();
        self.conn().execute(
            "INSERT INTO chat_typing (chat_id, user_id, typed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id, user_id) DO UPDATE SET typed_at = excluded.typed_at",
            params![chat.as_str(), user.as_str(), to_millis(&now)],
        )?;
        Ok(now)
    }

    /// Returns `true` if an entry was removed.
    pub fn clear_typing(&self, chat: &ChatId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_typing WHERE chat_id = ?1 AND user_id = ?2",
            params![chat.as_str(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Every typing entry of a chat, fresh or stale.
    pub fn typing_for_chat(&self, chat: &ChatId) -> Result<BTreeMap<UserId, DateTime<Utc>>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id, typed_at FROM chat_typing WHERE chat_id = ?1")?;
        let rows = stmt.query_map(params![chat.as_str()], |row| {
            Ok((user_col(row, 0)?, from_millis(1, row.get(1)?)?))
        })?;

        let mut typing = BTreeMap::new();
        for row in rows {
            let (user, at) = row?;
            typing.insert(user, at);
        }
        Ok(typing)
    }
}
