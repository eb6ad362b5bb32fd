//! Maps domain `AppError` to HTTP responses.
//!
//! Structured errors render as their status and body. Anything else is
//! logged with its cause chain and answered with a generic 500 so internal
//! details never reach the client.

use std::any::Any;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use beacon_core::error::{AppError, ErrorKind};

/// Standard API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// Optional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiErrorResponse {
    /// Body sent for every unrecognized error.
    pub fn internal() -> Self {
        Self {
            error: ErrorKind::Internal.code().to_string(),
            message: "Internal server error".to_string(),
            details: None,
        }
    }
}

/// Handler error type: anything convertible into [`AppError`] can be
/// returned with `?`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;

        if !err.is_structured() {
            error!(error = %err.chain(), "Unhandled error");
            return internal_error_response();
        }

        let status = StatusCode::from_u16(err.kind.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %err.chain(), status = status.as_u16(), "Request failed");
        } else {
            warn!(code = err.kind.code(), message = %err.message, "Request rejected");
        }

        let body = ApiErrorResponse {
            error: err.kind.code().to_string(),
            message: err.message,
            details: err.details,
        };

        (status, Json(body)).into_response()
    }
}

fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiErrorResponse::internal()),
    )
        .into_response()
}

/// Turns a handler panic into the generic 500.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    error!(panic = %detail, "Handler panicked");
    internal_error_response()
}
