//! # bazaar-store
//!
//! Backing document store for the bazaar chat core, built on SQLite.
//!
//! Every timestamp is assigned here from the store's clock at write time.
//! The per-user maps that several writers touch concurrently (read
//! receipts, typing, presence, mutes) are updated with single-statement
//! upserts whose conflict clauses encode the merge law: `MAX()` for
//! receipts and heartbeats, overwrite for typing and mutes.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod presence;
pub mod receipts;
pub mod typing;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
