//! Liveness endpoint.

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

pub const LIVENESS_MARKER: &str = "infergate running";

/// GET / - plain-text liveness marker.
async fn index() -> &'static str {
    LIVENESS_MARKER
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(index))
}
