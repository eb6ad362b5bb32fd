//! The ordered middleware pipeline.
//!
//! Stages are plain values in a list; [`Pipeline::apply`] installs them in
//! one pass so the first stage is the outermost layer. Router dispatch sits
//! between [`Stage::BodyLimit`] and [`Stage::ErrorBoundary`].

use std::fmt;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::debug;

use crate::error::handle_panic;
use crate::handlers::fallback::route_not_found;
use crate::middleware::{body, compression, cors, hardening, logging, proxy, session};
use crate::state::AppState;

/// One step of request processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Request span and access log.
    Trace,
    /// Client address and scheme resolution.
    ProxyTrust,
    /// Signed cookie session.
    Session,
    /// Origin allowlist and CORS headers.
    Cors,
    /// Query-parameter dedupe and security headers.
    Hardening,
    /// Response compression.
    Compression,
    /// Size-bounded body buffering and JSON parsing.
    BodyLimit,
    /// Unmatched-route 404 and panic recovery.
    ErrorBoundary,
}

impl Stage {
    /// Stage name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::ProxyTrust => "proxy_trust",
            Self::Session => "session",
            Self::Cors => "cors",
            Self::Hardening => "hardening",
            Self::Compression => "compression",
            Self::BodyLimit => "body_limit",
            Self::ErrorBoundary => "error_boundary",
        }
    }

    fn install(self, router: Router, state: &AppState) -> Router {
        match self {
            Self::Trace => router
                .layer(from_fn(logging::request_logging))
                .layer(logging::build_trace_layer()),
            Self::ProxyTrust => {
                router.layer(from_fn_with_state(state.clone(), proxy::resolve_client))
            }
            Self::Session => {
                router.layer(from_fn_with_state(state.clone(), session::attach_session))
            }
            Self::Cors => router
                .layer(cors::build_cors_layer(&state.config.server.cors))
                .layer(from_fn_with_state(state.clone(), cors::enforce_origin)),
            Self::Hardening => router.layer(from_fn_with_state(state.clone(), hardening::harden)),
            Self::Compression => router.layer(compression::build_compression_layer()),
            Self::BodyLimit => router.layer(from_fn_with_state(state.clone(), body::limit_body)),
            Self::ErrorBoundary => router
                .fallback(route_not_found)
                .layer(CatchPanicLayer::custom(handle_panic)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered list of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// A pipeline with an explicit stage order.
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// The production order.
    pub fn standard() -> Self {
        Self::new(vec![
            Stage::Trace,
            Stage::ProxyTrust,
            Stage::Session,
            Stage::Cors,
            Stage::Hardening,
            Stage::Compression,
            Stage::BodyLimit,
            Stage::ErrorBoundary,
        ])
    }

    /// Stages, outermost first.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Wrap `router` so requests pass through the stages in order.
    pub fn apply(&self, router: Router, state: &AppState) -> Router {
        // Layers added later wrap earlier ones, so install innermost first.
        self.stages.iter().rev().fold(router, |router, stage| {
            debug!(stage = %stage, "Installing pipeline stage");
            stage.install(router, state)
        })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}
