//! Presence tracker.
//!
//! Writes are optimistic: `connect` and `heartbeat` mark a user online and
//! `disconnect` marks them offline. Readers then discount any record whose
//! last heartbeat is older than the presence TTL, which covers clients that
//! vanish without ever saying goodbye.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use bazaar_shared::types::UserId;
use bazaar_store::{PresenceRecord, PresenceState};

use crate::error::Result;
use crate::notifier::Notifier;
use crate::store::Store;

/// Presence as a reader should show it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceView {
    pub user_id: UserId,
    pub state: PresenceState,
    /// `None` if the user has never connected.
    pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceView {
    pub fn is_online(&self) -> bool {
        self.state == PresenceState::Online
    }
}

/// Apply the TTL to a stored record.
pub fn effective_state(record: &PresenceRecord, now: DateTime<Utc>, ttl: Duration) -> PresenceState {
    match record.state {
        PresenceState::Online if now - record.last_seen <= ttl => PresenceState::Online,
        _ => PresenceState::Offline,
    }
}

#[derive(Clone)]
pub struct PresenceTracker {
    store: Store,
    notifier: Arc<Notifier>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(store: Store, notifier: Arc<Notifier>, ttl: Duration) -> Self {
        Self {
            store,
            notifier,
            ttl,
        }
    }

    pub fn connect(&self, user: &UserId) -> Result<PresenceView> {
        let record = self.store.with(|db| db.presence_connect(user))?;
        tracing::debug!(user = %user, "connected");
        Ok(self.publish(&record))
    }

    /// Best effort: a lost heartbeat is covered by the next one, so
    /// failures are logged and dropped.
    pub fn heartbeat(&self, user: &UserId) {
        match self.store.with(|db| db.presence_heartbeat(user)) {
            Ok(record) => {
                self.publish(&record);
            }
            Err(e) => warn!(user = %user, error = %e, "heartbeat dropped"),
        }
    }

    pub fn disconnect(&self, user: &UserId) -> Result<PresenceView> {
        let record = self.store.with(|db| db.presence_disconnect(user))?;
        tracing::debug!(user = %user, "disconnected");
        Ok(self.publish(&record))
    }

    pub fn presence(&self, user: &UserId) -> Result<PresenceView> {
        let record = self.store.find(|db| db.get_presence(user))?;
        Ok(match record {
            Some(record) => self.view(&record),
            None => PresenceView {
                user_id: user.clone(),
                state: PresenceState::Offline,
                last_seen: None,
            },
        })
    }

    fn view(&self, record: &PresenceRecord) -> PresenceView {
        PresenceView {
            user_id: record.user_id.clone(),
            state: effective_state(record, self.store.now(), self.ttl),
            last_seen: Some(record.last_seen),
        }
    }

    fn publish(&self, record: &PresenceRecord) -> PresenceView {
        let view = self.view(record);
        self.notifier.publish_presence(&view);
        view
    }
}

#[cfg(test)]
mod tests {
    use bazaar_shared::clock::ManualClock;
    use bazaar_store::Database;

    use super::*;
    use crate::notifier::{Scope, Update};

    fn setup() -> (PresenceTracker, Arc<ManualClock>, Arc<Notifier>) {
        let clock = Arc::new(ManualClock::at_epoch_millis(1_700_000_000_000));
        let db = Database::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        let notifier = Arc::new(Notifier::new());
        let tracker = PresenceTracker::new(Store::new(db), notifier.clone(), Duration::seconds(90));
        (tracker, clock, notifier)
    }

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[test]
    fn test_unknown_user_is_offline() {
        let (tracker, _clock, _notifier) = setup();
        let view = tracker.presence(&user("ghost")).unwrap();
        assert_eq!(view.state, PresenceState::Offline);
        assert_eq!(view.last_seen, None);
    }

    #[test]
    fn test_stale_heartbeat_reads_offline() {
        let (tracker, clock, _notifier) = setup();
        let alice = user("alice");

        assert!(tracker.connect(&alice).unwrap().is_online());

        clock.advance(Duration::seconds(60));
        tracker.heartbeat(&alice);
        clock.advance(Duration::seconds(90));
        assert!(tracker.presence(&alice).unwrap().is_online());

        // Process killed: no disconnect, no more heartbeats.
        clock.advance(Duration::milliseconds(1));
        let view = tracker.presence(&alice).unwrap();
        assert_eq!(view.state, PresenceState::Offline);
        assert!(view.last_seen.is_some());
    }

    #[test]
    fn test_explicit_disconnect_is_immediate() {
        let (tracker, _clock, notifier) = setup();
        let alice = user("alice");
        let mut watcher = notifier.subscribe(user("bob"), Scope::Presence(alice.clone()));

        tracker.connect(&alice).unwrap();
        tracker.disconnect(&alice).unwrap();

        assert!(!tracker.presence(&alice).unwrap().is_online());
        let states: Vec<_> = std::iter::from_fn(|| watcher.updates.try_recv().ok())
            .map(|u| match u {
                Update::Presence { presence } => presence.state,
                other => panic!("unexpected update: {other:?}"),
            })
            .collect();
        assert_eq!(states, [PresenceState::Online, PresenceState::Offline]);
    }

    #[test]
    fn test_effective_state_ignores_ttl_when_offline() {
        let now = Utc::now();
        let record = PresenceRecord {
            user_id: user("alice"),
            state: PresenceState::Offline,
            last_seen: now,
        };
        assert_eq!(
            effective_state(&record, now, Duration::seconds(90)),
            PresenceState::Offline
        );
    }
}
