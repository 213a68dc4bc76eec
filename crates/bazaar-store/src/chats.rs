//! Chat records and their per-participant side tables.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::params;
use rusqlite::types::Type;

use bazaar_shared::types::{ChatId, UserId};

use crate::database::{conversion_error, from_millis, parse_text, to_millis, Database};
use crate::error::{Result, StoreError};
use crate::models::{Chat, ChatKind, MuteUntil, Removal};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create the chat with the given initial participants unless a record
    /// with this id already exists, then return the stored record.
    ///
    /// An existing record is never modified, so mute/block/typing state
    /// survives repeated resolution. The boolean is `true` when this call
    /// created the record.
    pub fn create_chat_if_missing(
        &mut self,
        id: &ChatId,
        kind: ChatKind,
        participants: &BTreeSet<UserId>,
    ) -> Result<(Chat, bool)> {
        let now = to_millis(&self.now());

        let tx = self.conn_mut().transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO chats (id, kind, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![id.as_str(), kind.as_str(), now],
        )? == 1;

        if inserted {
            for user in participants {
                tx.execute(
                    "INSERT OR IGNORE INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
                    params![id.as_str(), user.as_str()],
                )?;
            }
        }
        tx.commit()?;

        if inserted {
            tracing::debug!(chat = %id, kind = kind.as_str(), "created chat");
        }

        Ok((self.get_chat(id)?, inserted))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a chat with all of its per-participant maps.
    pub fn get_chat(&self, id: &ChatId) -> Result<Chat> {
        let (kind, created_at, updated_at) = self
            .conn()
            .query_row(
                "SELECT kind, created_at, updated_at FROM chats WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let kind: String = row.get(0)?;
                    let kind = ChatKind::from_db(&kind).ok_or_else(|| {
                        conversion_error(0, Type::Text, format!("unknown chat kind: {kind}"))
                    })?;
                    Ok((
                        kind,
                        from_millis(1, row.get(1)?)?,
                        from_millis(2, row.get(2)?)?,
                    ))
                },
            )
            .map_err(StoreError::from_query)?;

        Ok(Chat {
            id: id.clone(),
            kind,
            participants: self.participants(id)?,
            muted_by: self.mutes(id)?,
            blocked_users: self.blocks(id)?,
            deleted_by: self.deletions(id)?,
            typing: self.typing_for_chat(id)?,
            created_at,
            updated_at,
        })
    }

    /// Chats `user` participates in and has not deleted for themselves,
    /// most recently active first.
    pub fn list_chats_for_user(&self, user: &UserId) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id
             FROM chats c
             JOIN chat_participants p ON p.chat_id = c.id
             WHERE p.user_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM chat_deletions d
                   WHERE d.chat_id = c.id AND d.user_id = ?1
               )
             ORDER BY c.updated_at DESC, c.id ASC",
        )?;

        let rows = stmt.query_map(params![user.as_str()], |row| {
            let raw: String = row.get(0)?;
            parse_text(0, &raw, ChatId::parse)
        })?;

        let mut chats = Vec::new();
        for id in rows {
            chats.push(self.get_chat(&id?)?);
        }
        Ok(chats)
    }

    fn participants(&self, id: &ChatId) -> Result<BTreeSet<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM chat_participants WHERE chat_id = ?1")?;
        let rows = stmt.query_map(params![id.as_str()], |row| user_col(row, 0))?;

        let mut participants = BTreeSet::new();
        for row in rows {
            participants.insert(row?);
        }
        Ok(participants)
    }

    fn mutes(&self, id: &ChatId) -> Result<BTreeMap<UserId, MuteUntil>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id, until FROM chat_mutes WHERE chat_id = ?1")?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            let user = user_col(row, 0)?;
            let until = match row.get::<_, Option<i64>>(1)? {
                Some(ms) => MuteUntil::Until(from_millis(1, ms)?),
                None => MuteUntil::Indefinite,
            };
            Ok((user, until))
        })?;

        let mut mutes = BTreeMap::new();
        for row in rows {
            let (user, until) = row?;
            mutes.insert(user, until);
        }
        Ok(mutes)
    }

    fn blocks(&self, id: &ChatId) -> Result<BTreeMap<UserId, BTreeSet<UserId>>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT blocker_id, blocked_id FROM chat_blocks WHERE chat_id = ?1")?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((user_col(row, 0)?, user_col(row, 1)?))
        })?;

        let mut blocks: BTreeMap<UserId, BTreeSet<UserId>> = BTreeMap::new();
        for row in rows {
            let (blocker, blocked) = row?;
            blocks.entry(blocker).or_default().insert(blocked);
        }
        Ok(blocks)
    }

    fn deletions(&self, id: &ChatId) -> Result<BTreeMap<UserId, DateTime<Utc>>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id, deleted_at FROM chat_deletions WHERE chat_id = ?1")?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((user_col(row, 0)?, from_millis(1, row.get(1)?)?))
        })?;

        let mut deletions = BTreeMap::new();
        for row in rows {
            let (user, at) = row?;
            deletions.insert(user, at);
        }
        Ok(deletions)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Returns `true` if `user` was not already a participant.
    pub fn add_participant(&self, id: &ChatId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
            params![id.as_str(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Remove `user` and their typing entry, unless they are the last
    /// participant. The count and the delete run as one statement, so two
    /// concurrent removals can never empty the chat.
    pub fn remove_participant(&mut self, id: &ChatId, user: &UserId) -> Result<Removal> {
        let tx = self.conn_mut().transaction()?;
        let affected = tx.execute(
            "DELETE FROM chat_participants
             WHERE chat_id = ?1 AND user_id = ?2
               AND (SELECT COUNT(*) FROM chat_participants WHERE chat_id = ?1) > 1",
            params![id.as_str(), user.as_str()],
        )?;
        if affected == 0 {
            let member: bool = tx.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2
                 )",
                params![id.as_str(), user.as_str()],
                |row| row.get(0),
            )?;
            return Ok(if member {
                Removal::LastParticipant
            } else {
                Removal::NotAParticipant
            });
        }
        tx.execute(
            "DELETE FROM chat_typing WHERE chat_id = ?1 AND user_id = ?2",
            params![id.as_str(), user.as_str()],
        )?;
        tx.commit()?;
        Ok(Removal::Removed)
    }

    // ------------------------------------------------------------------
    // Per-participant settings
    // ------------------------------------------------------------------

    /// Overwrite `user`'s mute. A later call always replaces an earlier one.
    pub fn set_mute(&self, id: &ChatId, user: &UserId, until: MuteUntil) -> Result<()> {
        let until_ms = match until {
            MuteUntil::Until(at) => Some(to_millis(&at)),
            MuteUntil::Indefinite => None,
        };
        self.conn().execute(
            "INSERT INTO chat_mutes (chat_id, user_id, until) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id, user_id) DO UPDATE SET until = excluded.until",
            params![id.as_str(), user.as_str(), until_ms],
        )?;
        Ok(())
    }

    pub fn clear_mute(&self, id: &ChatId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_mutes WHERE chat_id = ?1 AND user_id = ?2",
            params![id.as_str(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Returns `true` if the block is new.
    pub fn add_block(&self, id: &ChatId, blocker: &UserId, blocked: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO chat_blocks (chat_id, blocker_id, blocked_id)
             VALUES (?1, ?2, ?3)",
            params![id.as_str(), blocker.as_str(), blocked.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_block(&self, id: &ChatId, blocker: &UserId, blocked: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_blocks WHERE chat_id = ?1 AND blocker_id = ?2 AND blocked_id = ?3",
            params![id.as_str(), blocker.as_str(), blocked.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Hide the chat from `user`'s list. Other participants are unaffected,
    /// and the next message from someone `user` has not blocked restores it.
    pub fn soft_delete_chat(&self, id: &ChatId, user: &UserId) -> Result<DateTime<Utc>> {
        let now = self.now();
        self.conn().execute(
            "INSERT INTO chat_deletions (chat_id, user_id, deleted_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id, user_id) DO UPDATE SET deleted_at = excluded.deleted_at",
            params![id.as_str(), user.as_str(), to_millis(&now)],
        )?;
        Ok(now)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn user_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<UserId> {
    let raw: String = row.get(idx)?;
    parse_text(idx, &raw, UserId::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn pair() -> BTreeSet<UserId> {
        [user("alice"), user("bob")].into_iter().collect()
    }

    #[test]
    fn test_create_if_missing_is_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        let id = ChatId::direct(&user("alice"), &user("bob"));

        let (first, created) = db
            .create_chat_if_missing(&id, ChatKind::Direct, &pair())
            .unwrap();
        assert!(created);
        assert_eq!(first.participants, pair());

        db.set_mute(&id, &user("alice"), MuteUntil::Indefinite)
            .unwrap();

        let (second, created) = db
            .create_chat_if_missing(&id, ChatKind::Direct, &pair())
            .unwrap();
        assert!(!created);
        assert_eq!(second.muted_by.get(&user("alice")), Some(&MuteUntil::Indefinite));
    }

    #[test]
    fn test_get_missing_chat() {
        let db = Database::open_in_memory().unwrap();
        let id = ChatId::scoped("job-1").unwrap();
        assert!(matches!(db.get_chat(&id), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_mute_overwrites() {
        let mut db = Database::open_in_memory().unwrap();
        let id = ChatId::direct(&user("alice"), &user("bob"));
        db.create_chat_if_missing(&id, ChatKind::Direct, &pair())
            .unwrap();

        let hour = db.now() + chrono::Duration::hours(1);
        let day = db.now() + chrono::Duration::hours(24);
        db.set_mute(&id, &user("alice"), MuteUntil::Until(hour))
            .unwrap();
        db.set_mute(&id, &user("alice"), MuteUntil::Until(day))
            .unwrap();

        let chat = db.get_chat(&id).unwrap();
        assert_eq!(chat.muted_by.get(&user("alice")), Some(&MuteUntil::Until(day)));

        assert!(db.clear_mute(&id, &user("alice")).unwrap());
        assert!(!db.clear_mute(&id, &user("alice")).unwrap());
    }

    #[test]
    fn test_blocks_are_directional() {
        let mut db = Database::open_in_memory().unwrap();
        let id = ChatId::direct(&user("alice"), &user("bob"));
        db.create_chat_if_missing(&id, ChatKind::Direct, &pair())
            .unwrap();

        assert!(db.add_block(&id, &user("alice"), &user("bob")).unwrap());
        assert!(!db.add_block(&id, &user("alice"), &user("bob")).unwrap());

        let chat = db.get_chat(&id).unwrap();
        assert!(chat.has_blocked(&user("alice"), &user("bob")));
        assert!(!chat.has_blocked(&user("bob"), &user("alice")));

        assert!(db.remove_block(&id, &user("alice"), &user("bob")).unwrap());
        assert!(db.get_chat(&id).unwrap().blocked_users.is_empty());
    }

    #[test]
    fn test_soft_delete_hides_from_list_only_for_deleter() {
        let mut db = Database::open_in_memory().unwrap();
        let id = ChatId::direct(&user("alice"), &user("bob"));
        db.create_chat_if_missing(&id, ChatKind::Direct, &pair())
            .unwrap();

        db.soft_delete_chat(&id, &user("alice")).unwrap();

        assert!(db.list_chats_for_user(&user("alice")).unwrap().is_empty());
        assert_eq!(db.list_chats_for_user(&user("bob")).unwrap().len(), 1);
        assert!(!db.get_chat(&id).unwrap().is_active_for(&user("alice")));
    }

    #[test]
    fn test_membership_changes() {
        let mut db = Database::open_in_memory().unwrap();
        let id = ChatId::scoped("guild-7").unwrap();
        let initial = [user("owner")].into_iter().collect();
        db.create_chat_if_missing(&id, ChatKind::Group, &initial)
            .unwrap();

        assert!(db.add_participant(&id, &user("dana")).unwrap());
        assert!(!db.add_participant(&id, &user("dana")).unwrap());
        assert_eq!(db.get_chat(&id).unwrap().participants.len(), 2);

        assert_eq!(db.remove_participant(&id, &user("dana")).unwrap(), Removal::Removed);
        assert_eq!(
            db.remove_participant(&id, &user("dana")).unwrap(),
            Removal::NotAParticipant
        );
        assert_eq!(
            db.remove_participant(&id, &user("owner")).unwrap(),
            Removal::LastParticipant
        );
        assert_eq!(db.get_chat(&id).unwrap().participants.len(), 1);
    }
}
