//! Size-bounded body buffering and JSON parsing.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::BytesMut;
use futures::StreamExt;

use beacon_core::{AppError, AppResult};

use crate::error::ApiError;
use crate::state::AppState;

/// The buffered request body, attached as an extension.
#[derive(Debug, Clone)]
pub struct ParsedBody {
    /// Parsed value for `application/json` bodies.
    pub json: Option<serde_json::Value>,
    /// Raw bytes.
    pub bytes: Bytes,
}

/// Buffers the body up to `body.max_bytes` before dispatch.
pub async fn limit_body(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match buffer_body(request, state.config.body.max_bytes).await {
        Ok(request) => next.run(request).await,
        Err(e) => ApiError(e).into_response(),
    }
}

async fn buffer_body(request: Request, limit: usize) -> AppResult<Request> {
    if declared_length(request.headers()).is_some_and(|len| len > limit) {
        return Err(AppError::payload_too_large(limit));
    }

    let (mut parts, body) = request.into_parts();
    let mut stream = body.into_data_stream();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| AppError::validation(format!("Failed to read request body: {e}")))?;
        if buffer.len() + chunk.len() > limit {
            return Err(AppError::payload_too_large(limit));
        }
        buffer.extend_from_slice(&chunk);
    }
    let bytes = buffer.freeze();

    let json = if is_json(&parts.headers) && !bytes.is_empty() {
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::validation(format!("Malformed JSON body: {e}")))?;
        Some(value)
    } else {
        None
    };

    parts.extensions.insert(ParsedBody {
        json,
        bytes: bytes.clone(),
    });
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}
