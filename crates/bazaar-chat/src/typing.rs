//! Typing indicator manager.
//!
//! Each user owns one key per chat, so concurrent typists never contend.
//! Entries are never swept; an entry older than the TTL is simply ignored
//! by every reader.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use bazaar_shared::types::{ChatId, UserId};
use bazaar_store::Chat;

use crate::error::Result;
use crate::guard::{Operation, ParticipantGuard};
use crate::notifier::Notifier;
use crate::store::Store;

/// Users whose typing entry is within `ttl` of `now`.
pub fn fresh_typers(
    typing: &BTreeMap<UserId, DateTime<Utc>>,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Vec<UserId> {
    typing
        .iter()
        .filter(|(_, at)| now - **at <= ttl)
        .map(|(user, _)| user.clone())
        .collect()
}

#[derive(Clone)]
pub struct TypingIndicators {
    store: Store,
    guard: ParticipantGuard,
    notifier: Arc<Notifier>,
    ttl: Duration,
}

impl TypingIndicators {
    pub fn new(store: Store, guard: ParticipantGuard, notifier: Arc<Notifier>, ttl: Duration) -> Self {
        Self {
            store,
            guard,
            notifier,
            ttl,
        }
    }

    /// Guard denials are returned; store failures are logged and dropped
    /// since the next keystroke (or the TTL) heals them.
    pub fn set_typing(&self, chat_id: &ChatId, user: &UserId, is_typing: bool) -> Result<()> {
        let chat = self.guard.check(user, chat_id, Operation::Write)?;

        let written = self.store.with(|db| {
            if is_typing {
                db.touch_typing(chat_id, user).map(|_| ())
            } else {
                db.clear_typing(chat_id, user).map(|_| ())
            }
        });
        if let Err(e) = written {
            warn!(chat = %chat_id, user = %user, error = %e, "typing update dropped");
            return Ok(());
        }

        self.broadcast(&chat);
        Ok(())
    }

    /// Users currently typing in the chat, as `viewer` would see them.
    pub fn typing_users(&self, chat_id: &ChatId, viewer: &UserId) -> Result<Vec<UserId>> {
        let chat = self.guard.check(viewer, chat_id, Operation::Read)?;
        Ok(fresh_typers(&chat.typing, self.store.now(), self.ttl))
    }

    /// Push the current fresh typing set of `chat` to its open views.
    pub fn broadcast(&self, chat: &Chat) {
        match self.store.with(|db| db.typing_for_chat(&chat.id)) {
            Ok(typing) => {
                let users = fresh_typers(&typing, self.store.now(), self.ttl);
                self.notifier.publish_typing(chat, &users);
            }
            Err(e) => warn!(chat = %chat.id, error = %e, "typing broadcast skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use bazaar_shared::clock::ManualClock;
    use bazaar_store::{ChatKind, Database};

    use super::*;
    use crate::error::{ChatError, Denial};
    use crate::notifier::{Scope, Update};

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn setup() -> (TypingIndicators, Arc<ManualClock>, Arc<Notifier>, Store, ChatId) {
        let clock = Arc::new(ManualClock::at_epoch_millis(1_700_000_000_000));
        let mut db = Database::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        let chat = ChatId::direct(&user("alice"), &user("bob"));
        let members: BTreeSet<UserId> = [user("alice"), user("bob")].into_iter().collect();
        db.create_chat_if_missing(&chat, ChatKind::Direct, &members)
            .unwrap();

        let store = Store::new(db);
        let notifier = Arc::new(Notifier::new());
        let typing = TypingIndicators::new(
            store.clone(),
            ParticipantGuard::new(store.clone()),
            notifier.clone(),
            Duration::seconds(5),
        );
        (typing, clock, notifier, store, chat)
    }

    #[test]
    fn test_stale_entry_is_never_rendered() {
        let (typing, clock, _notifier, _store, chat) = setup();

        typing.set_typing(&chat, &user("alice"), true).unwrap();
        assert_eq!(typing.typing_users(&chat, &user("bob")).unwrap(), [user("alice")]);

        // The client crashed and never sent `false`.
        clock.advance(Duration::seconds(6));
        assert!(typing.typing_users(&chat, &user("bob")).unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_entry() {
        let (typing, _clock, _notifier, store, chat) = setup();

        typing.set_typing(&chat, &user("alice"), true).unwrap();
        typing.set_typing(&chat, &user("bob"), true).unwrap();
        typing.set_typing(&chat, &user("alice"), false).unwrap();

        assert_eq!(typing.typing_users(&chat, &user("bob")).unwrap(), [user("bob")]);
        let raw = store.with(|db| db.typing_for_chat(&chat)).unwrap();
        assert!(!raw.contains_key(&user("alice")));
    }

    #[test]
    fn test_outsider_cannot_type() {
        let (typing, _clock, _notifier, _store, chat) = setup();
        assert!(matches!(
            typing.set_typing(&chat, &user("eve"), true),
            Err(ChatError::Unauthorized(Denial::NotAMember))
        ));
    }

    #[test]
    fn test_open_views_receive_typing_set() {
        let (typing, _clock, notifier, _store, chat) = setup();
        let mut view = notifier.subscribe(user("bob"), Scope::Chat(chat.clone()));

        typing.set_typing(&chat, &user("alice"), true).unwrap();

        match view.updates.try_recv().unwrap() {
            Update::Typing { users, .. } => assert_eq!(users, [user("alice")]),
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn test_fresh_typers_boundary() {
        let now = Utc::now();
        let typing: BTreeMap<UserId, DateTime<Utc>> = [
            (user("edge"), now - Duration::seconds(5)),
            (user("stale"), now - Duration::seconds(5) - Duration::milliseconds(1)),
        ]
        .into_iter()
        .collect();
        assert_eq!(fresh_typers(&typing, now, Duration::seconds(5)), [user("edge")]);
    }
}
