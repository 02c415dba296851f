//! Companion client file written next to a running server.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CLIENT_FILE_NAME: &str = "client.py";

fn client_source(port: u16) -> String {
    format!(
        r#"import requests

response = requests.post("http://127.0.0.1:{port}/predict", json={{"input": 4.0}})
print(f"Status: {{response.status_code}}\nResponse:\n {{response.text}}")
"#
    )
}

/// Write the client into `dir` unless one already exists.
///
/// Returns the path when a file was written.
pub fn write_client_stub(dir: &Path, port: u16) -> io::Result<Option<PathBuf>> {
    let path = dir.join(CLIENT_FILE_NAME);
    if path.exists() {
        return Ok(None);
    }
    fs::write(&path, client_source(port))?;
    Ok(Some(path))
}

/// Write the client into the working directory, logging instead of failing.
pub fn generate_client_file(port: u16) {
    let result = std::env::current_dir().and_then(|dir| write_client_stub(&dir, port));
    match result {
        Ok(Some(path)) => tracing::info!("Wrote client example to {}", path.display()),
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to write client example: {}", e),
    }
}
