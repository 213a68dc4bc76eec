//! Chat resolver.
//!
//! Maps a conversation context onto exactly one chat record, creating it on
//! first use. An existing record is returned untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use bazaar_shared::types::{ChatId, UserId};
use bazaar_store::{Chat, ChatKind};

use crate::error::{ChatError, Denial, Result};
use crate::notifier::Notifier;
use crate::store::Store;

/// Kind of a chat whose id comes from the job or guild module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopedKind {
    Job,
    Group,
}

impl From<ScopedKind> for ChatKind {
    fn from(kind: ScopedKind) -> Self {
        match kind {
            ScopedKind::Job => ChatKind::JobScoped,
            ScopedKind::Group => ChatKind::Group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatContext {
    /// Two-party chat. Order does not matter.
    Direct(UserId, UserId),
    /// Chat owned by another module, which supplies id and initial members.
    Scoped {
        id: ChatId,
        kind: ScopedKind,
        participants: BTreeSet<UserId>,
    },
}

#[derive(Clone)]
pub struct ChatResolver {
    store: Store,
    notifier: Arc<Notifier>,
}

impl ChatResolver {
    pub fn new(store: Store, notifier: Arc<Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Return the chat for `context`, creating it if missing. The actor
    /// must belong to the participant set; they are never added silently.
    ///
    /// The returned chat is redacted for the actor.
    pub fn resolve(&self, actor: &UserId, context: ChatContext) -> Result<Chat> {
        let (id, kind, participants) = match context {
            ChatContext::Direct(a, b) => {
                if a == b {
                    return Err(ChatError::ValidationFailed(
                        "a direct chat needs two distinct users".into(),
                    ));
                }
                let id = ChatId::direct(&a, &b);
                (id, ChatKind::Direct, BTreeSet::from([a, b]))
            }
            ChatContext::Scoped {
                id,
                kind,
                participants,
            } => {
                if id.is_direct() {
                    return Err(ChatError::ValidationFailed(format!(
                        "chat id {id} is reserved for direct chats"
                    )));
                }
                if participants.is_empty() {
                    return Err(ChatError::ValidationFailed(
                        "a chat needs at least one participant".into(),
                    ));
                }
                (id, kind.into(), participants)
            }
        };

        if !participants.contains(actor) {
            return Err(Denial::NotAMember.into());
        }

        let (chat, created) = self
            .store
            .with(|db| db.create_chat_if_missing(&id, kind, &participants))?;

        if chat.kind != kind {
            return Err(ChatError::Conflict(format!(
                "chat {id} already exists as {}",
                chat.kind.as_str()
            )));
        }
        // Membership may have changed since the record was created.
        if !chat.is_participant(actor) {
            return Err(Denial::NotAMember.into());
        }

        if created {
            info!(chat = %id, kind = kind.as_str(), members = chat.participants.len(), "chat created");
            self.notifier.publish_chat(&chat);
        }
        Ok(chat.redacted_for(actor))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bazaar_store::{Database, MuteUntil};

    use super::*;
    use crate::notifier::{Scope, Update};

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn setup() -> (ChatResolver, Store, Arc<Notifier>) {
        let store = Store::new(Database::open_in_memory().unwrap());
        let notifier = Arc::new(Notifier::new());
        (ChatResolver::new(store.clone(), notifier.clone()), store, notifier)
    }

    fn count_chats(store: &Store) -> i64 {
        store
            .with(|db| {
                db.conn()
                    .query_row("SELECT COUNT(*) FROM chats", [], |r| r.get(0))
                    .map_err(Into::into)
            })
            .unwrap()
    }

    #[test]
    fn test_direct_is_order_independent() {
        let (resolver, store, _) = setup();
        let ab = resolver
            .resolve(&user("alice"), ChatContext::Direct(user("alice"), user("bob")))
            .unwrap();
        let ba = resolver
            .resolve(&user("bob"), ChatContext::Direct(user("bob"), user("alice")))
            .unwrap();

        assert_eq!(ab.id, ba.id);
        assert_eq!(ab.id.as_str(), "direct:alice:bob");
        assert_eq!(count_chats(&store), 1);
    }

    #[test]
    fn test_concurrent_direct_resolution_creates_one_record() {
        let (resolver, store, _) = setup();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = resolver.clone();
                thread::spawn(move || {
                    let (me, other) = if i % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
                    resolver
                        .resolve(&user(me), ChatContext::Direct(user(me), user(other)))
                        .unwrap()
                        .id
                })
            })
            .collect();

        let ids: BTreeSet<ChatId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(count_chats(&store), 1);
    }

    #[test]
    fn test_outsider_cannot_resolve() {
        let (resolver, store, _) = setup();
        assert!(matches!(
            resolver.resolve(&user("eve"), ChatContext::Direct(user("alice"), user("bob"))),
            Err(ChatError::Unauthorized(Denial::NotAMember))
        ));
        assert!(matches!(
            resolver.resolve(
                &user("eve"),
                ChatContext::Scoped {
                    id: ChatId::scoped("job-42").unwrap(),
                    kind: ScopedKind::Job,
                    participants: BTreeSet::from([user("alice"), user("bob")]),
                }
            ),
            Err(ChatError::Unauthorized(Denial::NotAMember))
        ));
        assert_eq!(count_chats(&store), 0);
    }

    #[test]
    fn test_existing_scoped_chat_is_not_clobbered() {
        let (resolver, store, _) = setup();
        let id = ChatId::scoped("job-42").unwrap();
        let context = |members: &[&str]| ChatContext::Scoped {
            id: id.clone(),
            kind: ScopedKind::Job,
            participants: members.iter().map(|m| user(m)).collect(),
        };

        resolver.resolve(&user("alice"), context(&["alice", "bob"])).unwrap();
        store
            .with(|db| db.set_mute(&id, &user("alice"), MuteUntil::Indefinite))
            .unwrap();

        let again = resolver
            .resolve(&user("alice"), context(&["alice", "carol"]))
            .unwrap();
        assert_eq!(
            again.participants,
            BTreeSet::from([user("alice"), user("bob")])
        );
        assert_eq!(again.muted_by.get(&user("alice")), Some(&MuteUntil::Indefinite));
    }

    #[test]
    fn test_kind_mismatch_conflicts() {
        let (resolver, _, _) = setup();
        let id = ChatId::scoped("guild-7").unwrap();
        let members = BTreeSet::from([user("alice")]);

        resolver
            .resolve(
                &user("alice"),
                ChatContext::Scoped {
                    id: id.clone(),
                    kind: ScopedKind::Group,
                    participants: members.clone(),
                },
            )
            .unwrap();
        assert!(matches!(
            resolver.resolve(
                &user("alice"),
                ChatContext::Scoped {
                    id,
                    kind: ScopedKind::Job,
                    participants: members,
                }
            ),
            Err(ChatError::Conflict(_))
        ));
    }

    #[test]
    fn test_rejects_self_chat_and_reserved_ids() {
        let (resolver, _, _) = setup();
        assert!(matches!(
            resolver.resolve(&user("alice"), ChatContext::Direct(user("alice"), user("alice"))),
            Err(ChatError::ValidationFailed(_))
        ));
        assert!(matches!(
            resolver.resolve(
                &user("alice"),
                ChatContext::Scoped {
                    id: ChatId::direct(&user("alice"), &user("bob")),
                    kind: ScopedKind::Group,
                    participants: BTreeSet::from([user("alice"), user("bob")]),
                }
            ),
            Err(ChatError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_creation_reaches_chat_list() {
        let (resolver, _, notifier) = setup();
        let mut list = notifier.subscribe(user("bob"), Scope::User(user("bob")));

        resolver
            .resolve(&user("alice"), ChatContext::Direct(user("alice"), user("bob")))
            .unwrap();
        assert!(matches!(list.updates.try_recv().unwrap(), Update::Chat { .. }));

        resolver
            .resolve(&user("bob"), ChatContext::Direct(user("bob"), user("alice")))
            .unwrap();
        assert!(list.updates.try_recv().is_err());
    }
}
