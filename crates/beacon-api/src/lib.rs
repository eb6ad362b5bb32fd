//! # beacon-api
//!
//! HTTP layer for Beacon built on Axum.
//!
//! Provides the ordered middleware [`Pipeline`](pipeline::Pipeline), the
//! global error boundary, the WebSocket upgrade route, and the server
//! lifecycle. Application routes are supplied by the caller.

pub mod app;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod router;
pub mod state;

pub use app::{build_app, connect_broker, run_server, serve};
pub use error::{ApiError, ApiErrorResponse};
pub use pipeline::{Pipeline, Stage};
pub use state::AppState;
