//! # bazaar-server
//!
//! HTTP front end for the bazaar chat core.
//!
//! This binary provides:
//! - **REST API** (axum) for chats, messages, receipts, typing and presence
//! - **Server-Sent Events** streams backed by the realtime notifier
//! - **Per-user rate limiting** of message sends and typing updates
//!
//! Callers are identified by the `x-user-id` header set by the identity
//! gateway in front of this service.

mod api;
mod config;
mod error;
mod events;
mod rate_limit;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use bazaar_chat::{ChatService, TracingSink};
use bazaar_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,bazaar_server=debug,bazaar_chat=debug")
            }),
        )
        .init();

    info!("Starting bazaar chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and build the chat core
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(path = ?db.path(), "Chat store opened");

    let service = ChatService::new(db, config.chat_settings(), Arc::new(TracingSink));

    let limiter = RateLimiter::new(config.send_quota(), config.typing_quota());

    let http_addr = config.http_addr;
    let app_state = AppState {
        service,
        limiter: limiter.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.purge_idle(std::time::Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
