use chrono::{DateTime, Utc};
use rusqlite::params;
use rusqlite::types::Type;
use uuid::Uuid;

use bazaar_shared::types::{ChatId, MessageId};

use crate::chats::user_col;
use crate::database::{conversion_error, from_millis, parse_text, to_millis, Database};
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageKind, MessageStatus, NewMessage, Payload};

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, kind, payload, status, created_at, edited_at, deleted_at";

impl Database {
    /// Persist a new message and return it with its server-assigned
    /// `created_at` and `Sent` status.
    ///
    /// In the same transaction the sender's own read receipt is recorded,
    /// the chat's `updated_at` is bumped, the sender's typing entry is
    /// cleared, and the chat is restored for the sender and for every
    /// participant who deleted it locally unless they blocked the sender.
    pub fn insert_message(&mut self, new: &NewMessage) -> Result<Message> {
        let created_at = self.now();
        let ts = to_millis(&created_at);
        let payload = serde_json::to_string(&new.payload)?;
        let kind = new.payload.kind();

        let chat = new.chat_id.as_str();
        let sender = new.sender_id.as_str();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, kind, payload, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.id.0.to_string(),
                chat,
                sender,
                kind.as_str(),
                payload,
                MessageStatus::Sent.as_str(),
                ts,
            ],
        )?;
        tx.execute(
            "INSERT INTO read_receipts (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
            params![new.id.0.to_string(), sender, ts],
        )?;
        tx.execute(
            "UPDATE chats SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
            params![chat, ts],
        )?;
        let restored = tx.execute(
            "DELETE FROM chat_deletions
             WHERE chat_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM chat_blocks b
                   WHERE b.chat_id = chat_deletions.chat_id
                     AND b.blocker_id = chat_deletions.user_id
                     AND b.blocked_id = ?2
               )",
            params![chat, sender],
        )?;
        tx.execute(
            "DELETE FROM chat_typing WHERE chat_id = ?1 AND user_id = ?2",
            params![chat, sender],
        )?;
        tx.commit()?;

        if restored > 0 {
            tracing::debug!(chat = %new.chat_id, restored, "chat restored by new activity");
        }

        Ok(Message {
            id: new.id,
            chat_id: new.chat_id.clone(),
            sender_id: new.sender_id.clone(),
            kind,
            payload: Some(new.payload.clone()),
            status: MessageStatus::Sent,
            read_by: [(new.sender_id.clone(), created_at)].into_iter().collect(),
            created_at,
            edited_at: None,
            deleted_at: None,
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_message,
            )
            .map_err(StoreError::from_query)?;
        message.read_by = self.read_by(id)?;
        Ok(message)
    }

    /// One page of a chat's history in `(created_at, id)` order, oldest
    /// first. With a cursor, only messages strictly before it are returned.
    pub fn messages_for_chat(
        &self,
        chat: &ChatId,
        before: Option<(DateTime<Utc>, MessageId)>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let (before_ts, before_id) = match before {
            Some((ts, id)) => (Some(to_millis(&ts)), Some(id.0.to_string())),
            None => (None, None),
        };

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE chat_id = ?1
               AND (?2 IS NULL OR created_at < ?2 OR (created_at = ?2 AND id < ?3))
             ORDER BY created_at DESC, id DESC
             LIMIT ?4"
        ))?;

        let rows = stmt.query_map(
            params![chat.as_str(), before_ts, before_id, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            message.read_by = self.read_by(message.id)?;
            messages.push(message);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Replace the payload of a live message and stamp `edited_at`.
    pub fn edit_message(&self, id: MessageId, payload: &Payload) -> Result<DateTime<Utc>> {
        let now = self.now();
        let affected = self.conn().execute(
            "UPDATE messages SET payload = ?2, edited_at = ?3
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id.0.to_string(), serde_json::to_string(payload)?, to_millis(&now)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(now)
    }

    /// Replace the content with a tombstone. `id`, `created_at` and the
    /// read receipts are kept. Returns `false` if it was already deleted.
    pub fn tombstone_message(&self, id: MessageId) -> Result<bool> {
        let now = self.now();
        let affected = self.conn().execute(
            "UPDATE messages SET payload = NULL, deleted_at = ?2
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id.0.to_string(), to_millis(&now)],
        )?;
        Ok(affected > 0)
    }

    /// Compare-and-set on the delivery status. Returns `true` if the
    /// message was in `from` and is now in `to`.
    pub fn advance_status(
        &self,
        id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = ?3 WHERE id = ?1 AND status = ?2",
            params![id.0.to_string(), from.as_str(), to.as_str()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let chat_str: String = row.get(1)?;
    let kind_str: String = row.get(3)?;
    let payload_json: Option<String> = row.get(4)?;
    let status_str: String = row.get(5)?;

    let id = MessageId(parse_text(0, &id_str, Uuid::parse_str)?);
    let chat_id = parse_text(1, &chat_str, ChatId::parse)?;
    let kind = MessageKind::from_db(&kind_str)
        .ok_or_else(|| conversion_error(3, Type::Text, format!("unknown kind: {kind_str}")))?;
    let payload = payload_json
        .map(|json| serde_json::from_str::<Payload>(&json))
        .transpose()
        .map_err(|e| conversion_error(4, Type::Text, e))?;
    let status = MessageStatus::from_db(&status_str)
        .ok_or_else(|| conversion_error(5, Type::Text, format!("unknown status: {status_str}")))?;

    let edited_at = row
        .get::<_, Option<i64>>(7)?
        .map(|ms| from_millis(7, ms))
        .transpose()?;
    let deleted_at = row
        .get::<_, Option<i64>>(8)?
        .map(|ms| from_millis(8, ms))
        .transpose()?;

    Ok(Message {
        id,
        chat_id,
        sender_id: user_col(row, 2)?,
        kind,
        payload,
        status,
        read_by: Default::default(),
        created_at: from_millis(6, row.get(6)?)?,
        edited_at,
        deleted_at,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use bazaar_shared::clock::ManualClock;
    use bazaar_shared::types::UserId;

    use super::*;
    use crate::models::ChatKind;

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

    fn text(chat: &ChatId, sender: &str, body: &str) -> NewMessage {
        NewMessage {
            id: MessageId::new(),
            chat_id: chat.clone(),
            sender_id: user(sender),
            payload: Payload::Text {
                text: body.to_string(),
                attachments: vec![],
            },
        }
    }

    #[test]
    fn test_insert_and_get() {
        let (mut db, _clock, chat) = setup();
        let sent = db.insert_message(&text(&chat, "alice", "hello")).unwrap();

        assert_eq!(sent.status, MessageStatus::Sent);
        assert_eq!(sent.read_by.get(&user("alice")), Some(&sent.created_at));

        let loaded = db.get_message(sent.id).unwrap();
        assert_eq!(loaded, sent);
        assert_eq!(db.get_chat(&chat).unwrap().updated_at, sent.created_at);
    }

    #[test]
    fn test_history_orders_ties_by_id_and_pages() {
        let (mut db, clock, chat) = setup();
        let mut sent = Vec::new();
        for i in 0..5 {
            sent.push(db.insert_message(&text(&chat, "alice", &i.to_string())).unwrap());
        }
        clock.advance(chrono::Duration::seconds(1));
        sent.push(db.insert_message(&text(&chat, "bob", "later")).unwrap());

        let mut expected = sent.clone();
        expected.sort_by_key(|m| m.order_key());

        let all = db.messages_for_chat(&chat, None, 50).unwrap();
        let ids: Vec<_> = all.iter().map(|m| m.id).collect();
        let expected_ids: Vec<_> = expected.iter().map(|m| m.id).collect();
        assert_eq!(ids, expected_ids);

        let last = expected.last().unwrap();
        let page = db
            .messages_for_chat(&chat, Some(last.order_key()), 2)
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].id, expected[4].id);
        assert_eq!(page[0].id, expected[3].id);
    }

    #[test]
    fn test_edit_and_tombstone() {
        let (mut db, _clock, chat) = setup();
        let sent = db.insert_message(&text(&chat, "alice", "helo")).unwrap();

        let fixed = Payload::Text {
            text: "hello".into(),
            attachments: vec![],
        };
        db.edit_message(sent.id, &fixed).unwrap();
        let edited = db.get_message(sent.id).unwrap();
        assert_eq!(edited.payload, Some(fixed.clone()));
        assert!(edited.edited_at.is_some());

        assert!(db.tombstone_message(sent.id).unwrap());
        assert!(!db.tombstone_message(sent.id).unwrap());
        let gone = db.get_message(sent.id).unwrap();
        assert!(gone.is_tombstone());
        assert_eq!(gone.created_at, sent.created_at);
        assert_eq!(gone.read_by, sent.read_by);

        assert!(matches!(
            db.edit_message(sent.id, &fixed),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_status_only_advances_from_expected_state() {
        let (mut db, _clock, chat) = setup();
        let sent = db.insert_message(&text(&chat, "alice", "hi")).unwrap();

        assert!(db
            .advance_status(sent.id, MessageStatus::Sent, MessageStatus::Delivered)
            .unwrap());
        assert!(!db
            .advance_status(sent.id, MessageStatus::Sent, MessageStatus::Delivered)
            .unwrap());
        assert_eq!(
            db.get_message(sent.id).unwrap().status,
            MessageStatus::Delivered
        );
    }

    #[test]
    fn test_new_message_restores_soft_deleted_chat_unless_blocked() {
        let (mut db, _clock, chat) = setup();

        db.soft_delete_chat(&chat, &user("alice")).unwrap();
        db.insert_message(&text(&chat, "bob", "ping")).unwrap();
        assert!(db.get_chat(&chat).unwrap().is_active_for(&user("alice")));

        db.soft_delete_chat(&chat, &user("alice")).unwrap();
        db.add_block(&chat, &user("alice"), &user("bob")).unwrap();
        db.insert_message(&text(&chat, "bob", "ping again")).unwrap();
        assert!(!db.get_chat(&chat).unwrap().is_active_for(&user("alice")));
    }

    #[test]
    fn test_send_clears_sender_typing() {
        let (mut db, _clock, chat) = setup();
        db.touch_typing(&chat, &user("alice")).unwrap();
        db.touch_typing(&chat, &user("bob")).unwrap();

        db.insert_message(&text(&chat, "alice", "done typing")).unwrap();

        let typing = db.typing_for_chat(&chat).unwrap();
        assert!(!typing.contains_key(&user("alice")));
        assert!(typing.contains_key(&user("bob")));
    }
}
