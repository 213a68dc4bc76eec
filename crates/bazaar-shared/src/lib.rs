// Types shared by every bazaar crate: identifiers, limits and the clock.

pub mod clock;
pub mod constants;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::IdError;
pub use types::{ChatId, MessageId, SubscriptionId, UserId};
