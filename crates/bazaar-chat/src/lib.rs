//! # bazaar-chat
//!
//! Messaging core for the bazaar marketplace: chat resolution, the
//! participant guard, the message pipeline, read receipts, typing
//! indicators, presence and realtime fan-out.
//!
//! All coordination goes through the store's merge primitives. Staleness
//! of typing entries and presence records is judged by readers, so nothing
//! here runs a cleanup sweep.

pub mod dispatch;
pub mod error;
pub mod guard;
pub mod notifier;
pub mod options;
pub mod pipeline;
pub mod presence;
pub mod receipts;
pub mod resolver;
pub mod service;
pub mod store;
pub mod typing;

pub use dispatch::{NotificationSink, OutboundNotification, TracingSink};
pub use error::{ChatError, Denial, Result};
pub use guard::{Operation, ParticipantGuard};
pub use notifier::{Notifier, Scope, Subscription, Update};
pub use presence::PresenceView;
pub use resolver::{ChatContext, ScopedKind};
pub use service::{ChatService, ChatSettings, ChatSummary};
