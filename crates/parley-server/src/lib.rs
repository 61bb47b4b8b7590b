//! # parley-server
//!
//! Realtime chat backend:
//! - **Mutation gateway** validating, authorizing, persisting and publishing
//!   every state change
//! - **Event bus** fanning row changes out to per-topic subscribers
//! - **REST API** (axum) and a WebSocket event stream
//! - **Identity adapter** for provider session tokens and webhooks
//! - **Media tokens** for external voice/video rooms
//! - **Per-client rate limiting**

pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod media;
pub mod rate_limit;
pub mod webhook;
pub mod ws;

pub use api::{build_router, serve, AppState};
pub use config::ServerConfig;
pub use error::GatewayError;
