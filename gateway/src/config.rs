//! Server configuration.

use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use crate::worker::{Accelerator, Devices, WorkerSettings};

/// Everything needed to start a server.
///
/// Built in code with the `with_*` methods, or loaded by [`ServerConfig::load`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub accelerator: Accelerator,
    #[serde(default)]
    pub devices: Devices,
    #[serde(default = "default_workers_per_device")]
    pub workers_per_device: usize,
    /// How long a caller waits for its reply.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// `1` selects the single-request loop.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Per-item wait while a batch is being collected.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_initial_pool_size")]
    pub initial_pool_size: usize,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Reply to `/predict` with a stream of chunks.
    #[serde(default)]
    pub stream: bool,
    /// Largest `n` accepted by the chat endpoint.
    #[serde(default = "default_max_completions")]
    pub max_completions: u32,
    /// Requests beyond this many queued ids are rejected with 503.
    /// Unbounded when unset.
    #[serde(default)]
    pub max_queue_size: Option<usize>,
    /// Shared secret expected in `X-API-Key`. Auth is disabled when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Write `client.py` to the working directory on start.
    #[serde(default = "default_true")]
    pub client_stub: bool,
}

// Default values
fn default_workers_per_device() -> usize {
    1
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_batch_size() -> usize {
    1
}
fn default_batch_timeout_ms() -> u64 {
    10
}
fn default_max_completions() -> u32 {
    16
}
fn default_initial_pool_size() -> usize {
    100
}
fn default_max_pool_size() -> usize {
    1000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            accelerator: Accelerator::default(),
            devices: Devices::default(),
            workers_per_device: default_workers_per_device(),
            timeout_ms: default_timeout_ms(),
            max_batch_size: default_max_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            stream: false,
            max_completions: default_max_completions(),
            initial_pool_size: default_initial_pool_size(),
            max_pool_size: default_max_pool_size(),
            max_queue_size: None,
            api_key: None,
            host: default_host(),
            port: default_port(),
            client_stub: default_true(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (INFERGATE__KEY format)
    /// 2. infergate.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("infergate").required(false))
            .add_source(
                Environment::with_prefix("INFERGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn with_accelerator(mut self, accelerator: Accelerator, devices: Devices) -> Self {
        self.accelerator = accelerator;
        self.devices = devices;
        self
    }

    pub fn with_workers_per_device(mut self, workers: usize) -> Self {
        self.workers_per_device = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_batching(mut self, max_batch_size: usize, batch_timeout: Duration) -> Self {
        self.max_batch_size = max_batch_size;
        self.batch_timeout_ms = batch_timeout.as_millis() as u64;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_max_completions(mut self, max: u32) -> Self {
        self.max_completions = max;
        self
    }

    pub fn with_pool_size(mut self, initial: usize, max: usize) -> Self {
        self.initial_pool_size = initial;
        self.max_pool_size = max;
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = Some(max);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_client_stub(mut self, enabled: bool) -> Self {
        self.client_stub = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_batch_size: self.max_batch_size.max(1),
            batch_timeout: Duration::from_millis(self.batch_timeout_ms),
            stream: self.stream,
        }
    }
}
