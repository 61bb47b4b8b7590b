use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parley_shared::authz::DenyReason;
use parley_shared::{ErrorBody, ErrorKind};
use parley_store::StoreError;
use thiserror::Error;

/// Rejection produced by any gateway stage.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Conflict(String),

    /// Store or collaborator failure. The detail is logged, never returned.
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("too many requests")]
    RateLimited,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            GatewayError::Forbidden(_) => ErrorKind::Forbidden,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::InvalidInput(_) => ErrorKind::InvalidInput,
            GatewayError::Conflict(_) => ErrorKind::Conflict,
            GatewayError::Upstream(_) => ErrorKind::Upstream,
            GatewayError::RateLimited => ErrorKind::RateLimited,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        GatewayError::InvalidInput(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        GatewayError::NotFound(what.into())
    }

    /// The body sent to clients.
    pub fn body(&self) -> ErrorBody {
        let reason = match self {
            GatewayError::Upstream(_) => "upstream failure".to_string(),
            other => other.to_string(),
        };
        ErrorBody::new(self.kind(), reason)
    }
}

impl From<DenyReason> for GatewayError {
    fn from(reason: DenyReason) -> Self {
        let text = reason.to_string();
        match reason.kind() {
            ErrorKind::Unauthenticated => GatewayError::Unauthenticated(text),
            ErrorKind::Conflict => GatewayError::Conflict(text),
            ErrorKind::NotFound => GatewayError::NotFound(text),
            ErrorKind::InvalidInput => GatewayError::InvalidInput(text),
            _ => GatewayError::Forbidden(text),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => GatewayError::NotFound("record".into()),
            StoreError::Conflict(detail) => GatewayError::Conflict(detail),
            other => GatewayError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::Upstream(detail) = &self {
            tracing::error!(detail = %detail, "upstream failure");
        }
        let status = StatusCode::from_u16(self.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self.body())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
