//! Fan-out of chat completion requests.
//!
//! A request asking for `n` completions becomes `n` independent dispatches.
//! Their replies are merged into one response with summed usage.

use futures_util::future::join_all;
use serde_json::Value;
use infergate_common::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, CompletionOutput, Usage,
};

use super::{Dispatcher, Reply};
use crate::error::{Error, Result};

pub const DEFAULT_MODEL: &str = "infergate";

/// Reject options the gateway cannot honor, before anything is dispatched.
pub fn validate(request: &ChatCompletionRequest, max_completions: u32) -> Result<()> {
    if request.stream == Some(true) {
        return Err(Error::UnsupportedParameter("stream".to_string()));
    }
    if request.stop.is_some() {
        return Err(Error::UnsupportedParameter("stop".to_string()));
    }
    if request.frequency_penalty.is_some_and(|p| p != 0.0) {
        return Err(Error::UnsupportedParameter("frequency_penalty".to_string()));
    }
    if request.presence_penalty.is_some_and(|p| p != 0.0) {
        return Err(Error::UnsupportedParameter("presence_penalty".to_string()));
    }
    if request.max_tokens.is_some() {
        return Err(Error::UnsupportedParameter("max_tokens".to_string()));
    }
    if request.top_p.is_some_and(|p| p != 1.0) {
        return Err(Error::UnsupportedParameter("top_p".to_string()));
    }
    if request.n == 0 {
        return Err(Error::InvalidRequest("n must be at least 1".to_string()));
    }
    if request.n > max_completions {
        return Err(Error::InvalidRequest(format!(
            "n must be at most {}",
            max_completions
        )));
    }
    Ok(())
}

/// Validate, dispatch `n` copies concurrently, and merge the replies.
pub async fn chat_completion(
    dispatcher: &Dispatcher,
    request: ChatCompletionRequest,
    max_completions: u32,
) -> Result<ChatCompletionResponse> {
    validate(&request, max_completions)?;

    let payload =
        serde_json::to_value(&request).map_err(|e| Error::Internal(e.to_string()))?;
    let replies =
        join_all((0..request.n).map(|_| complete_one(dispatcher, payload.clone()))).await;

    tracing::debug!(n = request.n, "chat completion fan-out finished");

    let model = request.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    aggregate(model, replies)
}

/// One completion. A streaming server's chunks are merged into one output.
async fn complete_one(dispatcher: &Dispatcher, payload: Value) -> Reply {
    if !dispatcher.is_streaming() {
        return dispatcher.dispatch(payload).await;
    }
    let chunks = dispatcher.dispatch_stream(payload).await?.collect().await?;
    merge_chunks(chunks)
}

/// Concatenate chunk texts and sum their usage. The last finish reason wins.
pub fn merge_chunks(chunks: Vec<Value>) -> Reply {
    let mut merged = CompletionOutput {
        text: String::new(),
        finish_reason: None,
        usage: None,
    };
    for chunk in chunks {
        let chunk: CompletionOutput = serde_json::from_value(chunk)
            .map_err(|e| Error::Inference(format!("invalid completion chunk: {}", e)))?;
        merged.text.push_str(&chunk.text);
        if chunk.finish_reason.is_some() {
            merged.finish_reason = chunk.finish_reason;
        }
        if let Some(usage) = chunk.usage {
            *merged.usage.get_or_insert_with(Usage::default) += usage;
        }
    }
    serde_json::to_value(merged).map_err(|e| Error::Internal(e.to_string()))
}

/// Merge per-index replies. The first failed reply fails the whole request.
pub fn aggregate(model: String, replies: Vec<Reply>) -> Result<ChatCompletionResponse> {
    let mut usage = Usage::default();
    let mut choices = Vec::with_capacity(replies.len());

    for (index, reply) in replies.into_iter().enumerate() {
        let output: CompletionOutput = serde_json::from_value(reply?)
            .map_err(|e| Error::Inference(format!("invalid completion output: {}", e)))?;

        usage += output.usage.unwrap_or_default();
        choices.push(Choice {
            index: index as u32,
            message: ChatMessage::assistant(output.text),
            finish_reason: Some(output.finish_reason.unwrap_or_else(|| "stop".to_string())),
        });
    }

    Ok(ChatCompletionResponse::new(model, choices, usage))
}
