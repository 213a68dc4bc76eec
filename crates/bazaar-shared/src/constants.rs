use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Bazaar";

/// Prefix of every Direct chat id (`direct:<lo>:<hi>`)
pub const DIRECT_CHAT_PREFIX: &str = "direct:";

/// Maximum length of a user id in bytes
pub const MAX_ID_LEN: usize = 128;

/// A typing entry older than this is stale and never rendered
pub const TYPING_TTL: Duration = Duration::from_secs(5);

/// Interval at which foregrounded clients send heartbeats
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A presence record without a heartbeat for this long reads as Offline
pub const PRESENCE_TTL: Duration = Duration::from_secs(90);

/// Maximum text body size in bytes (16 KiB)
pub const MAX_TEXT_LEN: usize = 16 * 1024;

/// Maximum number of media references on a single message
pub const MAX_ATTACHMENTS: usize = 10;

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Upper bound on a single history page
pub const MAX_PAGE_SIZE: u32 = 200;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
