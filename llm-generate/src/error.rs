use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;

use crate::services::verifier::VerifyError;

const INTERNAL_ERROR: &str = "Internal error";

/// Every way a generation request can fail. The `Display` text is exactly
/// what the caller sees in the `error` field.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Server API key not configured")]
    ServerMisconfigured,

    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken(#[source] VerifyError),

    #[error("Invalid contents")]
    InvalidPayload,

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("{message}")]
    Upstream { status: StatusCode, message: String },

    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    /// Build an internal error, falling back to a generic message when the
    /// cause has none.
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            ProxyError::Internal(INTERNAL_ERROR.to_string())
        } else {
            ProxyError::Internal(message)
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::ServerMisconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::MissingToken | ProxyError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ProxyError::InvalidPayload => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Upstream { status, .. } => *status,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body of every failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Response for a panic caught by `CatchPanicLayer`. The panic payload is
/// logged, never returned.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    tracing::error!(panic = %detail, "Request handler panicked");

    ProxyError::internal(INTERNAL_ERROR).into_response()
}
