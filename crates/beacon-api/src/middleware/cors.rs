//! Cross-origin policy: allowlist enforcement plus the CORS tower layer.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::ORIGIN;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::debug;

use beacon_core::AppError;
use beacon_core::config::CorsConfig;

use crate::error::ApiError;
use crate::state::AppState;

/// Rejects requests whose `Origin` is not on the allowlist.
///
/// Requests without an `Origin` header are not cross-origin and pass.
pub async fn enforce_origin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(origin) = request.headers().get(ORIGIN) {
        let cors = &state.config.server.cors;
        let allowed = origin
            .to_str()
            .map(|o| cors.is_origin_allowed(o))
            .unwrap_or(false);
        if !allowed {
            let origin = String::from_utf8_lossy(origin.as_bytes()).into_owned();
            debug!(origin = %origin, path = %request.uri().path(), "Origin rejected");
            return ApiError(AppError::forbidden(format!("Origin not allowed: {origin}")))
                .into_response();
        }
    }
    next.run(request).await
}

/// Builds a CORS tower layer from configuration.
pub fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();

    // Origins. Credentials rule out a literal `*`, so a wildcard mirrors the
    // request origin instead.
    if config.allows_any_origin() {
        layer = layer.allow_origin(AllowOrigin::mirror_request());
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.trim_end_matches('/').parse().ok())
            .collect();
        layer = layer.allow_origin(origins);
    }

    // Methods
    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    layer = layer.allow_methods(methods);

    // Headers
    if config.allowed_headers.iter().any(|h| h == "*") {
        layer = layer.allow_headers(AllowHeaders::mirror_request());
    } else {
        let headers: Vec<HeaderName> = config
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        layer = layer.allow_headers(headers);
    }

    layer
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(config.max_age_seconds))
}
