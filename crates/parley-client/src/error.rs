use parley_shared::{ErrorBody, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with an error body.
    #[error("{} ({status}): {}", .body.error, .body.reason)]
    Api { status: u16, body: ErrorBody },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base URL: {0}")]
    BaseUrl(String),

    #[error("Not in a call")]
    NotInCall,

    #[error("Already in a call")]
    AlreadyInCall,
}

impl ClientError {
    /// Error category reported by the gateway, if this came from one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Api { body, .. } => Some(body.error),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
