//! Signed cookie sessions.
//!
//! The cookie value is `base64url(json) "." base64url(hmac_sha256(json))`.
//! New cookies are signed with the first configured key; any configured key
//! verifies, so keys can rotate without dropping live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use beacon_core::AppError;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Session contents persisted in the cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Session ID.
    pub id: Uuid,
    /// When the session started.
    pub created_at: DateTime<Utc>,
    /// Arbitrary values set by handlers.
    #[serde(default)]
    pub values: HashMap<String, serde_json::Value>,
}

impl SessionData {
    fn fresh() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            values: HashMap::new(),
        }
    }
}

/// Signs and verifies session cookies.
pub struct SessionSigner {
    keys: Vec<Vec<u8>>,
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner")
            .field("keys", &self.keys.len())
            .finish()
    }
}

/// A verified cookie.
#[derive(Debug, Clone, PartialEq)]
pub struct Verified {
    /// Decoded session.
    pub data: SessionData,
    /// Index of the key that verified the signature.
    pub key_index: usize,
}

impl SessionSigner {
    /// Create a signer. Empty keys are ignored.
    pub fn new(keys: &[String]) -> Self {
        Self {
            keys: keys
                .iter()
                .filter(|k| !k.is_empty())
                .map(|k| k.as_bytes().to_vec())
                .collect(),
        }
    }

    /// Encode and sign with the primary key.
    pub fn sign(&self, data: &SessionData) -> Result<String, AppError> {
        let key = self
            .keys
            .first()
            .ok_or_else(|| AppError::configuration("No session signing key configured"))?;
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(data)?);
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| AppError::internal(format!("Invalid signing key: {e}")))?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{payload}.{signature}"))
    }

    /// Verify a cookie value against every key.
    pub fn verify(&self, value: &str) -> Option<Verified> {
        let (payload, signature) = value.split_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;

        let key_index = self.keys.iter().position(|key| {
            HmacSha256::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(payload.as_bytes());
                    mac.verify_slice(&signature).is_ok()
                })
                .unwrap_or(false)
        })?;

        let raw = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let data = serde_json::from_slice(&raw).ok()?;
        Some(Verified { data, key_index })
    }
}

#[derive(Debug)]
struct SessionInner {
    data: SessionData,
    dirty: bool,
}

/// Per-request session handle, available as an extractor.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
    is_new: bool,
}

impl Session {
    fn new(data: SessionData, is_new: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner { data, dirty: false })),
            is_new,
        }
    }

    /// Session ID.
    pub async fn id(&self) -> Uuid {
        self.inner.lock().await.data.id
    }

    /// Whether the session started with this request.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Read a value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let inner = self.inner.lock().await;
        inner
            .data
            .values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Store a value; the cookie is rewritten on the response.
    pub async fn insert(&self, key: &str, value: impl Serialize) -> Result<(), AppError> {
        let value = serde_json::to_value(value)?;
        let mut inner = self.inner.lock().await;
        inner.data.values.insert(key.to_string(), value);
        inner.dirty = true;
        Ok(())
    }

    /// Remove a value.
    pub async fn remove(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock().await;
        let removed = inner.data.values.remove(key);
        if removed.is_some() {
            inner.dirty = true;
        }
        removed
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| ApiError(AppError::internal("Session stage is not installed")))
    }
}

/// Loads the session cookie and writes it back when needed.
pub async fn attach_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let config = &state.config.session;
    let jar = CookieJar::from_headers(request.headers());
    let verified = jar
        .get(&config.cookie_name)
        .and_then(|cookie| state.sessions.verify(cookie.value()));

    let (session, resign) = match verified {
        Some(Verified { data, key_index }) => {
            if key_index > 0 {
                debug!(session_id = %data.id, "Re-signing session under the primary key");
            }
            (Session::new(data, false), key_index > 0)
        }
        None => (Session::new(SessionData::fresh(), true), false),
    };

    request.extensions_mut().insert(session.clone());
    let mut response = next.run(request).await;

    let inner = session.inner.lock().await;
    if !(session.is_new || resign || inner.dirty) {
        return response;
    }

    match state.sessions.sign(&inner.data) {
        Ok(value) => {
            let cookie = set_cookie_value(
                &config.cookie_name,
                &value,
                config.max_age_seconds,
                state.config.app.environment.is_production(),
            );
            match HeaderValue::from_str(&cookie) {
                Ok(header) => {
                    response.headers_mut().append(SET_COOKIE, header);
                }
                Err(e) => warn!(error = %e, "Session cookie is not a valid header"),
            }
        }
        Err(e) => warn!(error = %e.chain(), "Failed to sign session"),
    }
    response
}

fn set_cookie_value(name: &str, value: &str, max_age: u64, secure: bool) -> String {
    Cookie::build((name, value))
        .path("/")
        .max_age(time::Duration::seconds(i64::try_from(max_age).unwrap_or(i64::MAX)))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
        .to_string()
}
