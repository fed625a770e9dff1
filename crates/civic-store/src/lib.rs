//! # civic-store
//!
//! Server-side persistence for the civic chat backend, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for credentials,
//! profiles, groups and messages. Callers that share one handle across tasks
//! wrap it in a mutex.

pub mod credentials;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod profiles;

mod error;
mod rows;

pub use database::Database;
pub use error::StoreError;
pub use messages::MessagePage;
pub use models::*;
