//! Chat completions endpoint (OpenAI-compatible).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use infergate_common::{ChatCompletionRequest, ChatCompletionResponse};

use crate::error::Result;
use crate::gateway::fanout;
use crate::AppState;

/// Build the chat router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/completions", post(chat_completions))
}

/// POST /v1/chat/completions - one dispatch per requested completion.
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Json<ChatCompletionResponse>> {
    tracing::debug!(n = request.n, model = ?request.model, "Chat completion request");

    let response = fanout::chat_completion(&state.dispatcher, request, state.max_completions).await?;
    Ok(Json(response))
}
