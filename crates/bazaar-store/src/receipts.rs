//! Read receipts: per message, per reader, merged with `MAX()`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use bazaar_shared::types::{ChatId, MessageId, UserId};

use crate::chats::user_col;
use crate::database::{from_millis, parse_text, to_millis, Database};
use crate::error::Result;
use crate::models::{Message, ReadReceipt};

impl Database {
    /// Record that `user` has read every message of `chat` created at or
    /// before `up_to`, including others stamped in the same millisecond.
    ///
    /// Each receipt becomes `max(existing, now)`, so replayed or reordered
    /// calls from several devices can never move a receipt backward.
    /// Returns the store time used for the merge.
    pub fn merge_read_receipts(
        &self,
        chat: &ChatId,
        user: &UserId,
        up_to: &Message,
    ) -> Result<DateTime<Utc>> {
        let now = self.now();
        let merged = self.conn().execute(
            "INSERT INTO read_receipts (message_id, user_id, read_at)
             SELECT id, ?2, ?3 FROM messages
             WHERE chat_id = ?1
               AND created_at <= ?4
             ON CONFLICT(message_id, user_id)
             DO UPDATE SET read_at = MAX(read_at, excluded.read_at)",
            params![
                chat.as_str(),
                user.as_str(),
                to_millis(&now),
                to_millis(&up_to.created_at),
            ],
        )?;

        tracing::trace!(chat = %chat, user = %user, merged, "merged read receipts");
        Ok(now)
    }

    /// Ids of messages up to `up_to` that `user` holds no receipt for yet,
    /// oldest first. These are what a merge through `up_to` newly marks.
    pub fn unread_through(
        &self,
        chat: &ChatId,
        user: &UserId,
        up_to: &Message,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id FROM messages m
             WHERE m.chat_id = ?1
               AND m.created_at <= ?3
               AND NOT EXISTS (
                   SELECT 1 FROM read_receipts r
                   WHERE r.message_id = m.id AND r.user_id = ?2
               )
             ORDER BY m.created_at ASC, m.id ASC",
        )?;
        let rows = stmt.query_map(
            params![chat.as_str(), user.as_str(), to_millis(&up_to.created_at)],
            |row| {
                let raw: String = row.get(0)?;
                parse_text(0, &raw, Uuid::parse_str).map(MessageId)
            },
        )?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// The `read_by` map of one message.
    pub fn read_by(&self, message: MessageId) -> Result<BTreeMap<UserId, DateTime<Utc>>> {
        Ok(self
            .receipts_for_message(message)?
            .into_iter()
            .map(|r| (r.user_id, r.read_at))
            .collect())
    }

    /// Receipts of one message, most recent first.
    pub fn receipts_for_message(&self, message: MessageId) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, read_at FROM read_receipts
             WHERE message_id = ?1
             ORDER BY read_at DESC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![message.0.to_string()], |row| {
            Ok(ReadReceipt {
                user_id: user_col(row, 0)?,
                read_at: from_millis(1, row.get(1)?)?,
            })
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            receipts.push(row?);
        }
        Ok(receipts)
    }

    /// Messages in `chat` written by someone other than `user` that `user`
    /// holds no receipt for.
    pub fn unread_count(&self, chat: &ChatId, user: &UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages m
             WHERE m.chat_id = ?1
               AND m.sender_id != ?2
               AND NOT EXISTS (
                   SELECT 1 FROM read_receipts r
                   WHERE r.message_id = m.id AND r.user_id = ?2
               )",
            params![chat.as_str(), user.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// The newest receipt `user` holds anywhere in `chat`.
    pub fn last_read_at(&self, chat: &ChatId, user: &UserId) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> = self.conn().query_row(
            "SELECT MAX(r.read_at) FROM read_receipts r
             JOIN messages m ON m.id = r.message_id
             WHERE m.chat_id = ?1 AND r.user_id = ?2",
            params![chat.as_str(), user.as_str()],
            |row| row.get(0),
        )?;
        millis.map(|ms| from_millis(0, ms)).transpose().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use bazaar_shared::clock::ManualClock;
    use chrono::Duration;

    use super::*;
    use crate::models::{ChatKind, NewMessage, Payload};

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn setup() -> (Database, Arc<ManualClock>, ChatId) {
        let clock = Arc::new(ManualClock::at_epoch_millis(1_700_000_000_000));
        let mut db = Database::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        let id = ChatId::direct(&user("alice"), &user("bob"));
        let members: BTreeSet<UserId> = [user("alice"), user("bob")].into_iter().collect();
        db.create_chat_if_missing(&id, ChatKind::Direct, &members)
            .unwrap();
        (db, clock, id)
    }

    fn send(db: &mut Database, chat: &ChatId, sender: &str) -> Message {
        db.insert_message(&NewMessage {
            id: MessageId::new(),
            chat_id: chat.clone(),
            sender_id: user(sender),
            payload: Payload::Text {
                text: "msg".into(),
                attachments: vec![],
            },
        })
        .unwrap()
    }

    #[test]
    fn test_merge_marks_prefix_only() {
        let (mut db, clock, chat) = setup();
        let first = send(&mut db, &chat, "alice");
        clock.advance(Duration::seconds(1));
        let second = send(&mut db, &chat, "alice");
        clock.advance(Duration::seconds(1));
        let third = send(&mut db, &chat, "alice");

        assert_eq!(db.unread_count(&chat, &user("bob")).unwrap(), 3);

        clock.advance(Duration::seconds(1));
        db.merge_read_receipts(&chat, &user("bob"), &second).unwrap();

        assert!(db.read_by(first.id).unwrap().contains_key(&user("bob")));
        assert!(db.read_by(second.id).unwrap().contains_key(&user("bob")));
        assert!(!db.read_by(third.id).unwrap().contains_key(&user("bob")));
        assert_eq!(db.unread_count(&chat, &user("bob")).unwrap(), 1);
        assert_eq!(db.unread_count(&chat, &user("alice")).unwrap(), 0);
    }

    #[test]
    fn test_merge_covers_same_millisecond_messages() {
        let (mut db, _, chat) = setup();
        let a = send(&mut db, &chat, "alice");
        let b = send(&mut db, &chat, "alice");
        assert_eq!(a.created_at, b.created_at);

        // Reading through either one covers both, whatever their id order.
        assert_eq!(db.unread_through(&chat, &user("bob"), &a).unwrap().len(), 2);

        db.merge_read_receipts(&chat, &user("bob"), &a).unwrap();
        assert_eq!(db.unread_count(&chat, &user("bob")).unwrap(), 0);
    }

    #[test]
    fn test_unread_through_lists_only_new_marks() {
        let (mut db, clock, chat) = setup();
        let first = send(&mut db, &chat, "alice");
        clock.advance(Duration::seconds(1));
        let second = send(&mut db, &chat, "alice");
        clock.advance(Duration::seconds(1));
        let third = send(&mut db, &chat, "alice");

        db.merge_read_receipts(&chat, &user("bob"), &first).unwrap();
        let pending = db.unread_through(&chat, &user("bob"), &third).unwrap();
        assert_eq!(pending, [second.id, third.id]);

        // The sender already holds a receipt for everything they wrote.
        assert!(db.unread_through(&chat, &user("alice"), &third).unwrap().is_empty());
    }

    #[test]
    fn test_receipts_never_move_backward() {
        let (mut db, clock, chat) = setup();
        let msg = send(&mut db, &chat, "alice");

        clock.advance(Duration::seconds(10));
        let later = db.merge_read_receipts(&chat, &user("bob"), &msg).unwrap();

        // A delayed call from another device carrying an older clock reading.
        clock.advance(Duration::seconds(-5));
        db.merge_read_receipts(&chat, &user("bob"), &msg).unwrap();

        assert_eq!(db.read_by(msg.id).unwrap().get(&user("bob")), Some(&later));
        assert_eq!(db.last_read_at(&chat, &user("bob")).unwrap(), Some(later));
    }

    #[test]
    fn test_receipts_sorted_most_recent_first() {
        let (mut db, clock, chat) = setup();
        let msg = send(&mut db, &chat, "alice");

        clock.advance(Duration::seconds(3));
        db.merge_read_receipts(&chat, &user("bob"), &msg).unwrap();

        let receipts = db.receipts_for_message(msg.id).unwrap();
        let readers: Vec<_> = receipts.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(readers, ["bob", "alice"]);
    }
}
