//! Startup configuration
//!
//! The records handed to the server and client at startup, and the
//! auth-file loader.

use std::path::Path;

use crate::codec::sanitize;
use crate::error::AppError;

/// Default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port (0 lets the OS pick one)
pub const DEFAULT_PORT: u16 = 0;

/// Server startup configuration
///
/// The secret is fixed for the lifetime of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub secret: String,
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Configuration with the default host and port
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }

    /// `host:port` string for `TcpListener::bind`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client startup configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Preferred display name, before any collision suffix
    pub name: String,
    pub secret: String,
    pub host: String,
    pub port: u16,
}

impl ClientConfig {
    /// `host:port` string for `TcpStream::connect`
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Extract the secret from auth file contents: the first line, sanitized
pub fn secret_from_contents(contents: &[u8]) -> String {
    let first_line = contents
        .split(|b| *b == b'\n')
        .next()
        .unwrap_or_default();
    sanitize(first_line)
}

/// Read the shared secret from an auth file
///
/// An empty file yields the empty secret.
pub async fn load_secret(path: &Path) -> Result<String, AppError> {
    let contents = tokio::fs::read(path).await.map_err(|source| AppError::AuthFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(secret_from_contents(&contents))
}
