//! Lobby relay loop
//!
//! Applies the frames of an admitted session against the registry until the
//! session leaves, is kicked, or its stream ends.

use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::error::{AppError, CodecError};
use crate::message::ClientMessage;
use crate::server::RegistryHandle;
use crate::session::DeletedFlag;
use crate::types::SessionId;

/// How an admitted session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyExit {
    /// The session sent `LEAVE:`
    Left,
    /// The registry removed the session (kicked)
    Removed,
}

/// Relay frames until the session ends
///
/// Malformed or out-of-place frames are ignored. End-of-stream is reported
/// as `ConnectionClosed`.
pub async fn relay<S>(
    frames: &mut S,
    registry: &RegistryHandle,
    id: SessionId,
    name: &str,
    deleted: &DeletedFlag,
) -> Result<LobbyExit, AppError>
where
    S: Stream<Item = Result<ClientMessage, CodecError>> + Unpin,
{
    loop {
        if deleted.is_set() {
            return Ok(LobbyExit::Removed);
        }

        let frame = tokio::select! {
            frame = frames.next() => frame,
            _ = deleted.wait() => return Ok(LobbyExit::Removed),
        };
        let Some(frame) = frame else {
            return Err(AppError::ConnectionClosed);
        };

        match frame? {
            ClientMessage::Say(text) => registry.say(id, text).await?,
            ClientMessage::List => registry.list(id).await?,
            ClientMessage::Kick(target) => registry.kick(id, target).await?,
            ClientMessage::Leave => {
                registry.leave(id).await?;
                return Ok(LobbyExit::Left);
            }
            other => debug!("Ignoring {} frame from {}", other.kind(), name),
        }
    }
}
