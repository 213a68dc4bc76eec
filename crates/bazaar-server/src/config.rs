//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use bazaar_chat::ChatSettings;
use bazaar_shared::constants::{DEFAULT_HTTP_PORT, PRESENCE_TTL, TYPING_TTL};

use crate::rate_limit::Quota;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: the platform data directory (see `bazaar_store::database`).
    pub database_path: Option<PathBuf>,

    /// Typing entries older than this are ignored.
    /// Env: `TYPING_TTL_SECS`
    pub typing_ttl_secs: u64,

    /// Presence records without a heartbeat for this long read as offline.
    /// Env: `PRESENCE_TTL_SECS`
    pub presence_ttl_secs: u64,

    /// Sustained message sends per second per user.
    /// Env: `SEND_RATE_PER_SEC`
    pub send_rate_per_sec: f64,

    /// Message sends a user may burst before the rate applies.
    /// Env: `SEND_BURST`
    pub send_burst: f64,

    /// Sustained "is typing" updates per second per user. Clears are
    /// never throttled.
    /// Env: `TYPING_RATE_PER_SEC`
    pub typing_rate_per_sec: f64,

    /// Env: `TYPING_BURST`
    pub typing_burst: f64,
}

/// Upper bound for the typing and presence TTLs.
const MAX_TTL_SECS: u64 = 24 * 60 * 60;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            typing_ttl_secs: TYPING_TTL.as_secs(),
            presence_ttl_secs: PRESENCE_TTL.as_secs(),
            send_rate_per_sec: 5.0,
            send_burst: 20.0,
            typing_rate_per_sec: 2.0,
            typing_burst: 5.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Invalid values
    /// are logged and the default kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "TYPING_TTL_SECS").filter(valid_ttl) {
            config.typing_ttl_secs = secs;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PRESENCE_TTL_SECS").filter(valid_ttl) {
            config.presence_ttl_secs = secs;
        }

        if let Some(rate) = parse_var::<f64>(&lookup, "SEND_RATE_PER_SEC").filter(valid_rate) {
            config.send_rate_per_sec = rate;
        }

        if let Some(burst) = parse_var::<f64>(&lookup, "SEND_BURST").filter(valid_burst) {
            config.send_burst = burst;
        }

        if let Some(rate) = parse_var::<f64>(&lookup, "TYPING_RATE_PER_SEC").filter(valid_rate) {
            config.typing_rate_per_sec = rate;
        }

        if let Some(burst) = parse_var::<f64>(&lookup, "TYPING_BURST").filter(valid_burst) {
            config.typing_burst = burst;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn send_quota(&self) -> Quota {
        Quota {
            per_sec: self.send_rate_per_sec,
            burst: self.send_burst,
        }
    }

    pub fn typing_quota(&self) -> Quota {
        Quota {
            per_sec: self.typing_rate_per_sec,
            burst: self.typing_burst,
        }
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            typing_ttl: chrono::Duration::seconds(self.typing_ttl_secs as i64),
            presence_ttl: chrono::Duration::seconds(self.presence_ttl_secs as i64),
        }
    }
}

fn valid_ttl(secs: &u64) -> bool {
    (1..=MAX_TTL_SECS).contains(secs)
}

fn valid_rate(rate: &f64) -> bool {
    rate.is_finite() && *rate > 0.0
}

fn valid_burst(burst: &f64) -> bool {
    burst.is_finite() && *burst >= 1.0
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
