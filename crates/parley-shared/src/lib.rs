//! # parley-shared
//!
//! Types shared by every Parley crate: strongly-typed ids, the domain models
//! persisted by the store, realtime topics and wire events, the error kinds
//! surfaced to clients, and the pure authorization chain evaluator that the
//! gateway consults before any mutation.

pub mod authz;
pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::{ErrorBody, ErrorKind};
pub use types::*;
