//! Connection handler
//!
//! Handles one accepted connection: splits the stream, runs the writer
//! task, drives the handshake and then the lobby relay, and removes the
//! session from the registry on every exit path.

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::codec::ServerCodec;
use crate::error::{AppError, CodecError};
use crate::handshake;
use crate::lobby::{self, LobbyExit};
use crate::message::{ClientMessage, ServerMessage};
use crate::server::RegistryHandle;
use crate::session::DeletedFlag;
use crate::types::SessionId;

/// Handle a new connection
///
/// Works on any bidirectional byte stream. Returns once the session has
/// been removed from the registry and its stream closed.
pub async fn handle_connection<S>(stream: S, registry: RegistryHandle) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut frames = FramedRead::new(read_half, ServerCodec::default());
    let sink = FramedWrite::new(write_half, ServerCodec::default());

    // Channel for registry/handshake -> socket frames. Unbounded: a live
    // peer never misses a frame, and a failed writer closes the receiver so
    // the registry drops the session on its next delivery.
    let (outbound, outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let write_task = tokio::spawn(write_frames(sink, outbound_rx));

    let deleted = DeletedFlag::new();
    let id = registry.register(outbound.clone(), deleted.clone()).await?;
    debug!("Session {} accepted", id);

    let result = run_session(&mut frames, outbound, &registry, id, &deleted).await;

    // Cleanup runs whatever happened above
    let _ = registry.disconnect(id).await;
    drop(frames);
    let _ = write_task.await;

    log_outcome(id, &result);
    result.map(|_| ())
}

async fn run_session<S>(
    frames: &mut S,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    registry: &RegistryHandle,
    id: SessionId,
    deleted: &DeletedFlag,
) -> Result<LobbyExit, AppError>
where
    S: futures_util::Stream<Item = Result<ClientMessage, CodecError>> + Unpin,
{
    let name = handshake::negotiate(frames, &outbound, registry, id).await?;

    // The registry holds the only sender from here on, so removing the
    // session is what ends the writer task.
    drop(outbound);

    lobby::relay(frames, registry, id, &name, deleted).await
}

/// Write queued frames until every sender is gone, then close the stream
async fn write_frames<W>(
    mut sink: FramedWrite<W, ServerCodec>,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        // send() flushes after every frame
        if let Err(e) = sink.send(msg).await {
            debug!("Write failed, ending write task: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}

fn log_outcome(id: SessionId, result: &Result<LobbyExit, AppError>) {
    match result {
        Ok(LobbyExit::Left) => debug!("Session {} left", id),
        Ok(LobbyExit::Removed) => debug!("Session {} was kicked", id),
        Err(AppError::AuthenticationFailed) => info!("Session {} failed authentication", id),
        Err(AppError::Abandoned) => debug!("Session {} left during handshake", id),
        Err(e) if e.is_comms_failure() => warn!("Communications error on session {}: {}", id, e),
        Err(e) => debug!("Session {} ended: {}", id, e),
    }
}
