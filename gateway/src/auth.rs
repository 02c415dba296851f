//! Per-request authentication hook.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{Error, Result};

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Decides whether a request may proceed.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, headers: &HeaderMap) -> Result<()>;
}

/// Lets every request through.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<()> {
        Ok(())
    }
}

/// Requires `X-API-Key` to equal a shared secret.
#[derive(Clone)]
pub struct ApiKeyAuth {
    key: String,
}

impl ApiKeyAuth {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Authenticator for ApiKeyAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<()> {
        let provided = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::Unauthorized)?;

        if provided == self.key {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }
}

/// API key auth when a key is configured, pass-through otherwise.
pub fn authenticator_for(api_key: Option<&str>) -> Arc<dyn Authenticator> {
    match api_key {
        Some(key) if !key.is_empty() => Arc::new(ApiKeyAuth::new(key)),
        _ => Arc::new(NoAuth),
    }
}

/// Middleware running the configured authenticator before the handler.
pub async fn require_auth(
    State(auth): State<Arc<dyn Authenticator>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if let Err(e) = auth.authenticate(request.headers()) {
        tracing::debug!(path = %request.uri().path(), "rejected unauthenticated request");
        return Err(e);
    }
    Ok(next.run(request).await)
}
