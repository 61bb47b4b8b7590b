//! # parley-store
//!
//! Persistent storage for Parley, backed by SQLite.
//!
//! [`Database`] is a synchronous handle wrapping a `rusqlite::Connection`
//! with typed CRUD helpers for every domain model. [`SqliteStore`] wraps it
//! behind the async [`RowStore`] trait that the server consumes.

pub mod channels;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod profiles;
pub mod row_store;
pub mod servers;
pub mod social;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use messages::{MessagePage, MessageTable};
pub use row_store::{RowStore, SqliteStore};

/// Username shown for rows whose author profile has been removed.
pub const DELETED_USERNAME: &str = "deleted-user";
