//! HTTP API.

pub mod chat;
pub mod health;
pub mod predict;

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::auth::{require_auth, Authenticator};
use crate::logging::request_logger;
use crate::AppState;

/// Build the full router. Every route goes through `auth`.
pub fn router(state: Arc<AppState>, auth: Arc<dyn Authenticator>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(predict::router())
        .nest("/v1", chat::router())
        .route_layer(middleware::from_fn_with_state(auth, require_auth))
        .layer(middleware::from_fn(request_logger))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
