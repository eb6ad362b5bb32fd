//! Integration tests for the middleware pipeline and error boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::extract::{Query, RawQuery};
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use beacon_api::middleware::body::ParsedBody;
use beacon_api::middleware::session::{Session, SessionData, SessionSigner};
use beacon_api::{ApiError, AppState};
use beacon_core::AppError;

use crate::helpers::{ALLOWED_ORIGIN, BODY_LIMIT, TestApp};

/// Routes exercising each pipeline behaviour. `hits` counts requests that
/// reached the echo handler.
fn test_routes(hits: Arc<AtomicUsize>) -> Router<AppState> {
    Router::new()
        .route(
            "/echo",
            post(move |Extension(body): Extension<ParsedBody>| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(body.json.unwrap_or(Value::Null))
                }
            }),
        )
        .route("/conflict", get(conflict))
        .route("/boom", get(boom))
        .route("/panic", get(explode))
        .route("/visits", get(visits))
        .route("/query", get(|RawQuery(q): RawQuery| async move { Json(json!(q)) }))
        .route("/single", get(|Query(p): Query<SingleParam>| async move { p.a }))
        .route(
            "/framed",
            get(|| async { ([("x-frame-options", "DENY")], "framed").into_response() }),
        )
}

#[derive(Deserialize)]
struct SingleParam {
    a: String,
}

async fn conflict() -> Result<Json<Value>, ApiError> {
    Err(AppError::conflict("Channel already exists")
        .with_details(json!({"channel": "chat:room1"}))
        .into())
}

async fn boom() -> Result<Json<Value>, ApiError> {
    Err(anyhow::anyhow!("connection string postgres://admin:secret@db").into())
}

async fn explode() -> &'static str {
    panic!("invariant broken: secret state")
}

async fn visits(session: Session) -> Result<Json<Value>, ApiError> {
    let count = session.get::<u64>("visits").await.unwrap_or(0) + 1;
    session.insert("visits", count).await?;
    Ok(Json(json!({"visits": count})))
}

async fn app() -> (TestApp, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    (TestApp::with_routes(test_routes(hits.clone())).await, hits)
}

#[tokio::test]
async fn test_unmatched_route_names_path() {
    let (app, _) = app().await;

    let response = app.request("GET", "/no/such/route", None, &[]).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "NOT_FOUND");
    assert_eq!(response.body["details"]["path"], "/no/such/route");
    assert!(
        response.body["message"]
            .as_str()
            .unwrap()
            .contains("/no/such/route")
    );
}

#[tokio::test]
async fn test_structured_error_rendered_verbatim() {
    let (app, _) = app().await;

    let response = app.request("GET", "/conflict", None, &[]).await;

    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(
        response.body,
        json!({
            "error": "CONFLICT",
            "message": "Channel already exists",
            "details": {"channel": "chat:room1"}
        })
    );
}

#[tokio::test]
async fn test_unrecognized_error_is_generic_500() {
    let (app, _) = app().await;

    let response = app.request("GET", "/boom", None, &[]).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.body,
        json!({"error": "INTERNAL_ERROR", "message": "Internal server error"})
    );
}

#[tokio::test]
async fn test_panic_is_generic_500() {
    let (app, _) = app().await;

    let response = app.request("GET", "/panic", None, &[]).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body["error"], "INTERNAL_ERROR");
    assert!(!response.body.to_string().contains("secret"));
}

#[tokio::test]
async fn test_disallowed_origin_rejected_before_body_parsing() {
    let (app, hits) = app().await;

    // Malformed and oversized: either would fail body parsing if it ran.
    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "application/json")
        .header("origin", "http://evil.test")
        .body(Body::from(vec![b'{'; BODY_LIMIT * 4]))
        .unwrap();
    let response = app.send(req).await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body["error"], "FORBIDDEN");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_allowed_origin_gets_cors_headers() {
    let (app, hits) = app().await;

    let response = app
        .request(
            "POST",
            "/echo",
            Some(json!({"text": "hi"})),
            &[("origin", ALLOWED_ORIGIN)],
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({"text": "hi"}));
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some(ALLOWED_ORIGIN)
    );
    assert_eq!(
        response.header("access-control-allow-credentials"),
        Some("true")
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_preflight_from_allowed_origin() {
    let (app, hits) = app().await;

    let req = Request::builder()
        .method("OPTIONS")
        .uri("/echo")
        .header("origin", ALLOWED_ORIGIN)
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.send(req).await;

    assert!(response.status.is_success());
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some(ALLOWED_ORIGIN)
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversized_body_never_reaches_handler() {
    let (app, hits) = app().await;

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "application/json")
        .body(Body::from(vec![b' '; BODY_LIMIT + 1]))
        .unwrap();
    let response = app.send(req).await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.body["error"], "PAYLOAD_TOO_LARGE");
    assert_eq!(response.body["details"]["limit"], BODY_LIMIT);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_declared_oversized_body_rejected() {
    let (app, hits) = app().await;

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-length", (BODY_LIMIT * 10).to_string())
        .body(Body::from("{}"))
        .unwrap();
    let response = app.send(req).await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_json_is_validation_error() {
    let (app, hits) = app().await;

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "application/json")
        .body(Body::from("{\"text\": "))
        .unwrap();
    let response = app.send(req).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "VALIDATION_ERROR");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_session_cookie_issued_and_reused() {
    let (app, _) = app().await;

    let first = app.request("GET", "/visits", None, &[]).await;
    assert_eq!(first.body["visits"], 1);
    let set_cookie = first.header("set-cookie").unwrap().to_string();
    assert!(set_cookie.starts_with("beacon.sid="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(!set_cookie.contains("Secure"));

    let cookie = first.cookie().unwrap();
    let second = app
        .request("GET", "/visits", None, &[("cookie", cookie.as_str())])
        .await;
    assert_eq!(second.body["visits"], 2);
}

#[tokio::test]
async fn test_session_signed_with_rotated_key_is_accepted() {
    let (app, _) = app().await;
    let keys = app.config.session.keys.clone();

    let mut data = SessionData {
        id: uuid::Uuid::new_v4(),
        created_at: chrono::Utc::now(),
        values: Default::default(),
    };
    data.values.insert("visits".to_string(), json!(41));
    let old_signer = SessionSigner::new(&keys[1..]);
    let cookie = format!("beacon.sid={}", old_signer.sign(&data).unwrap());

    let response = app
        .request("GET", "/visits", None, &[("cookie", cookie.as_str())])
        .await;
    assert_eq!(response.body["visits"], 42);

    // Re-issued under the primary key.
    let reissued = response.cookie().unwrap();
    let value = reissued.strip_prefix("beacon.sid=").unwrap();
    let primary = SessionSigner::new(&keys[..1]);
    let verified = primary.verify(value).unwrap();
    assert_eq!(verified.key_index, 0);
    assert_eq!(verified.data.id, data.id);
}

#[tokio::test]
async fn test_forged_session_starts_fresh() {
    let (app, _) = app().await;
    let forged = SessionSigner::new(&["not-a-configured-key".to_string()]);
    let data = SessionData {
        id: uuid::Uuid::new_v4(),
        created_at: chrono::Utc::now(),
        values: [("visits".to_string(), json!(1000))].into_iter().collect(),
    };
    let cookie = format!("beacon.sid={}", forged.sign(&data).unwrap());

    let response = app
        .request("GET", "/visits", None, &[("cookie", cookie.as_str())])
        .await;
    assert_eq!(response.body["visits"], 1);
}

#[tokio::test]
async fn test_repeated_query_params_collapse_to_last() {
    let (app, _) = app().await;

    let response = app.request("GET", "/query?a=1&b=2&a=3", None, &[]).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!("a=3&b=2"));
}

#[tokio::test]
async fn test_encoded_duplicate_key_collapses_before_extraction() {
    let (app, _) = app().await;

    let plain = app.request("GET", "/single?a=1&a=2", None, &[]).await;
    assert_eq!(plain.status, StatusCode::OK);
    assert_eq!(plain.body, json!(2));

    let encoded = app.request("GET", "/single?a=1&%61=2", None, &[]).await;
    assert_eq!(encoded.status, StatusCode::OK);
    assert_eq!(encoded.body, json!(2));
}

#[tokio::test]
async fn test_security_headers_set_without_overriding() {
    let (app, _) = app().await;

    let response = app.request("GET", "/framed", None, &[]).await;
    assert_eq!(response.header("x-frame-options"), Some("DENY"));
    assert_eq!(response.header("x-content-type-options"), Some("nosniff"));
    assert!(response.header("strict-transport-security").is_none());

    let not_found = app.request("GET", "/missing", None, &[]).await;
    assert_eq!(not_found.header("x-frame-options"), Some("SAMEORIGIN"));
}

#[tokio::test]
async fn test_responses_are_compressed_on_request() {
    let (app, _) = app().await;

    let payload = json!({"text": "x".repeat(256)});
    let response = app
        .request(
            "POST",
            "/echo",
            Some(payload),
            &[("accept-encoding", "gzip")],
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-encoding"), Some("gzip"));
}

#[tokio::test]
async fn test_ws_route_requires_upgrade() {
    let (app, _) = app().await;

    let response = app.request("GET", "/ws", None, &[]).await;

    assert!(response.status.is_client_error());
    assert_ne!(response.status, StatusCode::NOT_FOUND);
}
