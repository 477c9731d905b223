//! # rentline-store
//!
//! SQLite persistence for the support relay. The crate exposes a synchronous
//! `Database` handle that wraps a `rusqlite::Connection` and provides typed
//! helpers for users, conversations, messages, reports and settings.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reports;
pub mod settings;
pub mod stats;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use stats::SupportCounts;
