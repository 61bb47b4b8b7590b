//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development. Invalid values are logged and
//! ignored.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use parley_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_SUBSCRIBER_QUEUE, MEDIA_TOKEN_TTL_SECS};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory (`parley.db`).
    pub database_path: Option<PathBuf>,

    /// HS256 key the identity provider signs session tokens with.
    /// Env: `SESSION_SECRET`
    /// Default: unset, every request is rejected as unauthenticated.
    pub session_secret: Option<String>,

    /// Expected `iss` claim of session tokens.
    /// Env: `SESSION_ISSUER`
    pub session_issuer: Option<String>,

    /// Signing secret for identity-provider webhooks (`whsec_...`).
    /// Env: `WEBHOOK_SECRET`
    /// Default: unset, the webhook endpoint answers 404.
    pub webhook_secret: Option<String>,

    // -- Media room tokens --

    /// Env: `MEDIA_API_KEY`
    pub media_api_key: Option<String>,

    /// Env: `MEDIA_API_SECRET`
    pub media_api_secret: Option<String>,

    /// Env: `MEDIA_TOKEN_TTL_SECS`
    /// Default: `600`
    pub media_token_ttl_secs: i64,

    // -- Limits --

    /// Sustained requests per second per client.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// Burst size per client.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,

    /// Queue depth of each event-bus subscriber.
    /// Env: `SUBSCRIBER_QUEUE_CAPACITY`
    /// Default: `1024`
    pub subscriber_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            session_secret: None,
            session_issuer: None,
            webhook_secret: None,
            media_api_key: None,
            media_api_secret: None,
            media_token_ttl_secs: MEDIA_TOKEN_TTL_SECS,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE,
        }
    }
}

// Secrets stay out of the startup log.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("session_secret", &self.session_secret.as_ref().map(|_| "<set>"))
            .field("session_issuer", &self.session_issuer)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<set>"))
            .field("media_api_key", &self.media_api_key)
            .field("media_api_secret", &self.media_api_secret.as_ref().map(|_| "<set>"))
            .field("media_token_ttl_secs", &self.media_token_ttl_secs)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("subscriber_queue_capacity", &self.subscriber_queue_capacity)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = non_empty("DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }

        config.session_secret = non_empty("SESSION_SECRET");
        config.session_issuer = non_empty("SESSION_ISSUER");
        config.webhook_secret = non_empty("WEBHOOK_SECRET");
        config.media_api_key = non_empty("MEDIA_API_KEY");
        config.media_api_secret = non_empty("MEDIA_API_SECRET");

        parse_into(&lookup, "MEDIA_TOKEN_TTL_SECS", &mut config.media_token_ttl_secs);
        parse_into(&lookup, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_into(&lookup, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);
        parse_into(
            &lookup,
            "SUBSCRIBER_QUEUE_CAPACITY",
            &mut config.subscriber_queue_capacity,
        );

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.media_token_ttl_secs, 600);
        assert_eq!(config.subscriber_queue_capacity, 1024);
        assert!(config.session_secret.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("SESSION_SECRET", "s3cret"),
            ("RATE_LIMIT_BURST", "5"),
            ("DATABASE_PATH", "/tmp/p.db"),
        ]));
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.session_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.rate_limit_burst, 5.0);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/p.db")));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("SUBSCRIBER_QUEUE_CAPACITY", "lots"),
            ("WEBHOOK_SECRET", "  "),
        ]));
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.subscriber_queue_capacity, 1024);
        assert!(config.webhook_secret.is_none());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = ServerConfig::from_lookup(lookup(&[("SESSION_SECRET", "hunter2")]));
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
    }
}
