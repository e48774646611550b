//! Multi-client TCP Chat Lobby Library
//!
//! A line-protocol chat server and its client counterpart built on tokio,
//! using the Actor pattern for shared state.
//!
//! # Features
//! - Shared-secret authentication
//! - Unique display names with NAME_TAKEN renegotiation
//! - Lobby chat, name listing, kicking and leaving
//! - Enter/leave presence broadcasts
//! - Per-session and server-wide counters, dumped on SIGHUP
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Registry` is the single task owning every session
//! - Each connection has a `handler` task talking to it through `RegistryHandle`
//! - Each session has its own writer task, so a slow peer never stalls a broadcast
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use lobby_chat::{handle_connection, Registry, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
//!     let registry = Registry::spawn(ServerConfig::new("s3cret"));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, registry.clone()));
//!     }
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod lobby;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod types;

// Re-export main types for convenience
pub use codec::{ClientCodec, LineCodec, ServerCodec};
pub use config::{ClientConfig, ServerConfig};
pub use error::{AppError, CodecError, SendError};
pub use handler::handle_connection;
pub use message::{ClientMessage, ServerMessage};
pub use server::{Registry, RegistryCommand, RegistryHandle};
pub use session::Session;
pub use stats::{StatsFormat, StatsSnapshot};
pub use types::SessionId;
