//! Presence records: one row per user, created on first contact and never
//! deleted.

use rusqlite::params;
use rusqlite::types::Type;

use bazaar_shared::types::UserId;

use crate::chats::user_col;
use crate::database::{conversion_error, from_millis, to_millis, Database};
use crate::error::{Result, StoreError};
use crate::models::{PresenceRecord, PresenceState};

impl Database {
    /// Mark `user` online as of now.
    pub fn presence_connect(&self, user: &UserId) -> Result<PresenceRecord> {
        self.upsert_presence(user, PresenceState::Online, true)
    }

    /// Refresh `last_seen` without touching the reported state. A heartbeat
    /// from a user with no record yet creates an online one.
    pub fn presence_heartbeat(&self, user: &UserId) -> Result<PresenceRecord> {
        self.upsert_presence(user, PresenceState::Online, false)
    }

    /// Mark `user` offline immediately.
    pub fn presence_disconnect(&self, user: &UserId) -> Result<PresenceRecord> {
        self.upsert_presence(user, PresenceState::Offline, true)
    }

    /// `last_seen` only ever moves forward, so a delayed write cannot make a
    /// user look idle for longer than they were.
    fn upsert_presence(
        &self,
        user: &UserId,
        state: PresenceState,
        overwrite_state: bool,
    ) -> Result<PresenceRecord> {
        let now = to_millis(&self.now());
        let sql = if overwrite_state {
            "INSERT INTO presence (user_id, state, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 state = excluded.state,
                 last_seen = MAX(last_seen, excluded.last_seen)"
        } else {
            "INSERT INTO presence (user_id, state, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 last_seen = MAX(last_seen, excluded.last_seen)"
        };
        self.conn()
            .execute(sql, params![user.as_str(), state.as_str(), now])?;
        self.get_presence(user)
    }

    pub fn get_presence(&self, user: &UserId) -> Result<PresenceRecord> {
        self.conn()
            .query_row(
                "SELECT user_id, state, last_seen FROM presence WHERE user_id = ?1",
                params![user.as_str()],
                |row| {
                    let state: String = row.get(1)?;
                    let state = PresenceState::from_db(&state).ok_or_else(|| {
                        conversion_error(1, Type::Text, format!("unknown presence state: {state}"))
                    })?;
                    Ok(PresenceRecord {
                        user_id: user_col(row, 0)?,
                        state,
                        last_seen: from_millis(2, row.get(2)?)?,
                    })
                },
            )
            .map_err(StoreError::from_query)
    }
}
