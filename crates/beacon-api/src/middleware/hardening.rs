//! Parameter-pollution guard and security response headers.

use std::borrow::Cow;
use std::collections::HashMap;

use axum::extract::{Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri};
use axum::middleware::Next;
use axum::response::Response;
use url::form_urlencoded;

use crate::state::AppState;

const STRICT_TRANSPORT_SECURITY: &str = "max-age=15552000; includeSubDomains";

/// Collapses repeated query parameters and sets security headers.
pub async fn harden(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if let Some(uri) = dedupe_query(request.uri()) {
        *request.uri_mut() = uri;
    }

    let mut response = next.run(request).await;
    apply_security_headers(
        response.headers_mut(),
        state.config.app.environment.is_production(),
    );
    response
}

/// Rewrites the query so each parameter appears once, keeping its last
/// value at the position of its first occurrence. Keys are compared after
/// percent-decoding. Returns `None` when nothing changes.
pub fn dedupe_query(uri: &Uri) -> Option<Uri> {
    let query = uri.query()?;

    let mut order: Vec<Cow<'_, str>> = Vec::new();
    let mut values: HashMap<Cow<'_, str>, Cow<'_, str>> = HashMap::new();
    let mut total = 0;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        total += 1;
        if values.insert(key.clone(), value).is_none() {
            order.push(key);
        }
    }
    if order.len() == total {
        return None;
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for key in &order {
        if let Some(value) = values.get(key) {
            serializer.append_pair(key, value);
        }
    }
    let rebuilt = serializer.finish();
    let path_and_query = PathAndQuery::try_from(format!("{}?{rebuilt}", uri.path())).ok()?;

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).ok()
}

/// Sets common security headers without overriding handler values.
pub fn apply_security_headers(headers: &mut HeaderMap, production: bool) {
    let defaults = [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "SAMEORIGIN"),
        ("referrer-policy", "no-referrer"),
        ("x-dns-prefetch-control", "off"),
        ("cross-origin-opener-policy", "same-origin"),
    ];
    for (name, value) in defaults {
        headers
            .entry(HeaderName::from_static(name))
            .or_insert(HeaderValue::from_static(value));
    }
    if production {
        headers
            .entry(HeaderName::from_static("strict-transport-security"))
            .or_insert(HeaderValue::from_static(STRICT_TRANSPORT_SECURITY));
    }
}
