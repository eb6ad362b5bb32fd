//! Unmatched-route handler.

use axum::http::Uri;

use beacon_core::AppError;

use crate::error::ApiError;

/// Answers any request no route claimed.
pub async fn route_not_found(uri: Uri) -> ApiError {
    let path = uri.path().to_string();
    ApiError(
        AppError::not_found(format!("Route not found: {path}"))
            .with_details(serde_json::json!({ "path": path })),
    )
}
