//! Single prediction endpoint.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::AppState;

/// Content type of streamed replies: one JSON document per line.
pub const NDJSON: &str = "application/x-ndjson";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/predict", post(predict))
}

/// POST /predict - hand the body to a replica and return its encoded reply.
///
/// Any body that parses as JSON is accepted, whatever its `Content-Type`.
/// It is decoded into the API's request type on the replica, so shape errors
/// come back as 422 from there.
async fn predict(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    let payload: Value =
        serde_json::from_slice(&body).map_err(|e| Error::Decode(e.to_string()))?;

    if state.dispatcher.is_streaming() {
        let chunks = state.dispatcher.dispatch_stream(payload).await?;
        let lines = chunks
            .into_stream()
            .map(|chunk| chunk.map(|value| format!("{}\n", value)));
        return Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response());
    }

    let reply = state.dispatcher.dispatch(payload).await?;
    Ok(Json(reply).into_response())
}
