//! Error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced to HTTP callers.
///
/// A request that finds no table entry, or a reply whose caller already gave
/// up, is not an error: both are resolved silently by the take-once table.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Invalid API Key. Check that you are passing a correct 'X-API-Key' in your header.")]
    Unauthorized,

    #[error("Parameter {0} not currently supported")]
    UnsupportedParameter(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Request queue is full")]
    QueueFull,

    #[error("Failed to decode request: {0}")]
    Decode(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Worker panicked while processing the request")]
    WorkerPanicked,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::UnsupportedParameter(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            Error::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            Error::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Inference(_) | Error::WorkerPanicked | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Error::Unauthorized => "authentication_failure",
            Error::UnsupportedParameter(_) => "unsupported_parameter",
            Error::InvalidRequest(_) => "invalid_request",
            Error::RequestTimeout => "request_timeout",
            Error::QueueFull => "queue_full",
            Error::Decode(_) => "decode_failed",
            Error::Inference(_) => "inference_failed",
            Error::WorkerPanicked => "worker_panicked",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string()
            }
        }));

        (self.status(), body).into_response()
    }
}

/// Failure of a user-supplied stage.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("decode: {0}")]
    Decode(String),

    #[error("predict: {0}")]
    Predict(String),

    #[error("encode: {0}")]
    Encode(String),

    /// The consumer of a streamed reply went away. Stop producing.
    #[error("stream consumer disconnected")]
    StreamClosed,
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Decode(msg) => Error::Decode(msg),
            other => Error::Inference(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::UnsupportedParameter("top_p".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::RequestTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(Error::QueueFull.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Error::WorkerPanicked.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_conversion() {
        let err: Error = ApiError::Decode("missing field".into()).into();
        assert!(matches!(err, Error::Decode(_)));

        let err: Error = ApiError::Predict("boom".into()).into();
        assert_eq!(err.to_string(), "Inference failed: predict: boom");
    }

    #[test]
    fn test_unsupported_parameter_message() {
        let err = Error::UnsupportedParameter("top_p".into());
        assert_eq!(err.to_string(), "Parameter top_p not currently supported");
    }
}
