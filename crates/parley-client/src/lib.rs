//! # parley-client
//!
//! Client library for the Parley gateway: a typed HTTP API client, the
//! realtime event session with reconnect and resubscription, and the local
//! state it feeds (per-topic timelines with optimistic sends, the desired
//! subscription set, friend requests and call controls).

pub mod api;
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod session;
pub mod state;
pub mod subscriptions;
pub mod timeline;

pub use api::ApiClient;
pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
