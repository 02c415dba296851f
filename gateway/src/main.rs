//! infergate - serves the bundled squaring model, or the counting stream
//! when `stream` is enabled.

use std::env;

use infergate::demo::{CountApi, SquareApi};
use infergate::logging::init_tracing;
use infergate::{Server, ServerConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared secret for `X-API-Key`. Read here and passed in explicitly.
const API_KEY_ENV: &str = "INFERGATE_API_KEY";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    if env::args().any(|a| a == "--version" || a == "-V") {
        println!("infergate {}", VERSION);
        return Ok(());
    }

    init_tracing("info");

    let mut config = ServerConfig::load()
        .map_err(|e| format!("Failed to load configuration: {}", e))?;
    if config.api_key.is_none() {
        config.api_key = env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
    }
    if config.api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }

    tracing::info!("Starting infergate {}", VERSION);

    if config.stream {
        Server::new(CountApi, config).run().await
    } else {
        Server::new(SquareApi::default(), config).run().await
    }
}
