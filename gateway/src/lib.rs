pub mod api;
pub mod auth;
pub mod client_stub;
pub mod config;
pub mod demo;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod routes;
pub mod server;
pub mod worker;

pub use api::InferenceApi;
pub use auth::{ApiKeyAuth, Authenticator, NoAuth};
pub use crate::config::ServerConfig;
pub use error::{ApiError, Error};
pub use gateway::{Dispatcher, ReplyStream};
pub use server::{RunningServer, Server};
pub use worker::{Accelerator, Device, DeviceSpec, Devices, StreamSink};

/// Shared application state.
pub struct AppState {
    /// Routes requests to replicas and waits for their replies.
    pub dispatcher: Dispatcher,
    /// Largest `n` accepted by the chat endpoint.
    pub max_completions: u32,
}
