use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;

/// Create the realtime WebSocket router.
///
/// The endpoint is unauthenticated: a session holds no persistent data,
/// audio is ephemeral, and the upstream credentials never leave the
/// server. Deployments that need access control should front this route
/// with a reverse proxy.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/realtime", get(ws::ws_realtime_handler))
        .layer(TraceLayer::new_for_http())
}
