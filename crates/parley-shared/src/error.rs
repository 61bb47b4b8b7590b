use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories surfaced to clients.
///
/// Each gateway rejection carries one of these plus a human-readable reason.
/// The serialized form is the machine-readable `error` field of every HTTP
/// error body.
#[derive(Error, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("invalid input")]
    InvalidInput,

    #[error("conflict")]
    Conflict,

    #[error("upstream failure")]
    Upstream,

    #[error("rate limited")]
    RateLimited,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidInput => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::Upstream => 502,
            ErrorKind::RateLimited => 429,
        }
    }
}

/// JSON body returned with every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub reason: String,
}

impl ErrorBody {
    pub fn new(error: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            error,
            reason: reason.into(),
        }
    }
}
