//! Application state shared across all handlers and middleware.

use std::sync::Arc;

use beacon_core::config::AppConfig;
use beacon_realtime::RealtimeEngine;

use crate::middleware::session::SessionSigner;

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
/// All fields are `Arc`-wrapped for cheap cloning across tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// WebSocket realtime engine
    pub realtime: Arc<RealtimeEngine>,
    /// Session cookie signer
    pub sessions: Arc<SessionSigner>,
}

impl AppState {
    /// Assemble state from configuration and a running engine.
    pub fn new(config: AppConfig, realtime: Arc<RealtimeEngine>) -> Self {
        let sessions = Arc::new(SessionSigner::new(&config.session.keys));
        Self {
            config: Arc::new(config),
            realtime,
            sessions,
        }
    }
}
