//! Client connection settings.

use crate::error::{ClientError, Result};

#[derive(Clone)]
pub struct ClientConfig {
    /// Gateway root, e.g. `https://chat.example.com`.
    pub base_url: String,
    /// Identity-provider session token sent as a bearer token.
    pub session_token: String,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("session_token", &"<set>")
            .finish()
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_token: session_token.into(),
        }
    }

    /// Absolute URL of an API path (`path` starts with `/`).
    pub fn http_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Event-stream URL, with the token in the query string.
    pub fn ws_url(&self) -> Result<String> {
        let rest = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ClientError::BaseUrl(self.base_url.clone()));
        };
        Ok(format!("{rest}/ws?token={}", self.session_token))
    }
}
