//! Route table: caller routes plus the built-in WebSocket upgrade.

use axum::Router;
use axum::routing::get;

use crate::handlers;
use crate::state::AppState;

/// Path of the WebSocket upgrade route.
pub const WS_PATH: &str = "/ws";

/// Merge application routes with the built-in routes.
pub fn build_router(routes: Router<AppState>) -> Router<AppState> {
    Router::new()
        .route(WS_PATH, get(handlers::ws::ws_upgrade))
        .merge(routes)
}
