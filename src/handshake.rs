//! Connection handshake state machine
//!
//! Drives a freshly registered session through
//! `AwaitingAuth → AwaitingName → Admitted`. Any failure ends the handshake
//! with an error and the caller closes the connection.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{AppError, CodecError};
use crate::message::{ClientMessage, ServerMessage};
use crate::registry::NameClaim;
use crate::server::RegistryHandle;
use crate::types::SessionId;

/// Handshake progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// `AUTH:` challenge sent, waiting for the secret
    AwaitingAuth,
    /// `WHO:` sent, waiting for a name
    AwaitingName,
    /// Name accepted; the session is in the lobby
    Admitted(String),
}

/// Whether an offered AUTH payload matches the configured secret
///
/// The empty secret matches only an absent payload.
pub fn secret_matches(secret: &str, offered: Option<&str>) -> bool {
    match offered {
        Some(token) => token == secret,
        None => secret.is_empty(),
    }
}

/// Run the handshake to completion and return the admitted name
///
/// `outbound` is the session's own writer queue, the same one registered
/// with the registry, so handshake replies and the registry's `OK:`/`ENTER:`
/// stay in order.
pub async fn negotiate<S>(
    frames: &mut S,
    outbound: &mpsc::UnboundedSender<ServerMessage>,
    registry: &RegistryHandle,
    id: SessionId,
) -> Result<String, AppError>
where
    S: Stream<Item = Result<ClientMessage, CodecError>> + Unpin,
{
    let mut state = HandshakeState::AwaitingAuth;
    loop {
        state = match state {
            HandshakeState::AwaitingAuth => authenticate(frames, outbound, registry, id).await?,
            HandshakeState::AwaitingName => request_name(frames, outbound, registry, id).await?,
            HandshakeState::Admitted(name) => return Ok(name),
        };
    }
}

fn queue(outbound: &mpsc::UnboundedSender<ServerMessage>, msg: ServerMessage) -> Result<(), AppError> {
    outbound.send(msg).map_err(|_| AppError::ConnectionClosed)
}

async fn next_frame<S>(frames: &mut S) -> Result<ClientMessage, AppError>
where
    S: Stream<Item = Result<ClientMessage, CodecError>> + Unpin,
{
    match frames.next().await {
        Some(frame) => Ok(frame?),
        None => Err(AppError::ConnectionClosed),
    }
}

async fn authenticate<S>(
    frames: &mut S,
    outbound: &mpsc::UnboundedSender<ServerMessage>,
    registry: &RegistryHandle,
    id: SessionId,
) -> Result<HandshakeState, AppError>
where
    S: Stream<Item = Result<ClientMessage, CodecError>> + Unpin,
{
    queue(outbound, ServerMessage::Auth)?;
    let frame = next_frame(frames).await;
    registry.record_auth().await?;

    match frame? {
        ClientMessage::Auth(offered) if secret_matches(registry.secret(), offered.as_deref()) => {
            debug!("Session {} authenticated", id);
            queue(outbound, ServerMessage::Ok)?;
            Ok(HandshakeState::AwaitingName)
        }
        ClientMessage::Auth(_) => Err(AppError::AuthenticationFailed),
        other => Err(AppError::ProtocolViolation {
            expected: "AUTH",
            received: other.kind().to_string(),
        }),
    }
}

async fn request_name<S>(
    frames: &mut S,
    outbound: &mpsc::UnboundedSender<ServerMessage>,
    registry: &RegistryHandle,
    id: SessionId,
) -> Result<HandshakeState, AppError>
where
    S: Stream<Item = Result<ClientMessage, CodecError>> + Unpin,
{
    queue(outbound, ServerMessage::Who)?;

    match next_frame(frames).await? {
        ClientMessage::Name(name) => match registry.claim_name(id, name.clone()).await? {
            NameClaim::Admitted => Ok(HandshakeState::Admitted(name)),
            NameClaim::Taken => {
                debug!("Session {} asked for taken name '{}'", id, name);
                queue(outbound, ServerMessage::NameTaken)?;
                Ok(HandshakeState::AwaitingName)
            }
            NameClaim::UnknownSession => Err(AppError::ConnectionClosed),
        },
        ClientMessage::EmptyName => {
            debug!("Session {} sent an empty name", id);
            queue(outbound, ServerMessage::NameTaken)?;
            Ok(HandshakeState::AwaitingName)
        }
        ClientMessage::Leave => Err(AppError::Abandoned),
        other => Err(AppError::ProtocolViolation {
            expected: "NAME",
            received: other.kind().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::server::Registry;
    use crate::session::DeletedFlag;
    use futures_util::stream;

    type Frames = stream::Iter<std::vec::IntoIter<Result<ClientMessage, CodecError>>>;

    fn frames(messages: Vec<ClientMessage>) -> Frames {
        stream::iter(messages.into_iter().map(Ok).collect::<Vec<_>>())
    }

    async fn setup(
        secret: &str,
    ) -> (
        RegistryHandle,
        SessionId,
        mpsc::UnboundedSender<ServerMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        let registry = Registry::spawn(ServerConfig::new(secret));
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(tx.clone(), DeletedFlag::new()).await.unwrap();
        (registry, id, tx, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_secret_matching() {
        assert!(secret_matches("s3cret", Some("s3cret")));
        assert!(!secret_matches("s3cret", Some("wrong")));
        assert!(!secret_matches("s3cret", None));
        assert!(secret_matches("", None));
        assert!(!secret_matches("", Some("anything")));
    }

    #[tokio::test]
    async fn test_successful_handshake_order() {
        let (registry, id, tx, mut rx) = setup("s3cret").await;
        let mut input = frames(vec![
            ClientMessage::auth("s3cret"),
            ClientMessage::Name("al".to_string()),
        ]);

        let name = negotiate(&mut input, &tx, &registry, id).await.unwrap();
        assert_eq!(name, "al");

        // Registry replies are queued before claim_name returns
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::Auth,
                ServerMessage::Ok,
                ServerMessage::Who,
                ServerMessage::Ok,
                ServerMessage::Enter("al".to_string()),
            ]
        );
        assert_eq!(registry.snapshot_sorted_names().await.unwrap(), vec!["al"]);
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let (registry, id, tx, mut rx) = setup("s3cret").await;
        let mut input = frames(vec![ClientMessage::auth("guess")]);

        let err = negotiate(&mut input, &tx, &registry, id).await.unwrap_err();
        assert!(matches!(err, AppError::AuthenticationFailed));
        assert_eq!(drain(&mut rx), vec![ServerMessage::Auth]);
        assert_eq!(registry.stats().await.unwrap().totals.auth, 1);
    }

    #[tokio::test]
    async fn test_non_auth_frame_rejected_and_counted() {
        let (registry, id, tx, _rx) = setup("s3cret").await;
        let mut input = frames(vec![ClientMessage::Name("al".to_string())]);

        let err = negotiate(&mut input, &tx, &registry, id).await.unwrap_err();
        assert!(matches!(err, AppError::ProtocolViolation { expected: "AUTH", .. }));
        assert_eq!(registry.stats().await.unwrap().totals.auth, 1);
    }

    #[tokio::test]
    async fn test_end_of_stream_during_auth() {
        let (registry, id, tx, _rx) = setup("s3cret").await;
        let mut input = frames(vec![]);

        let err = negotiate(&mut input, &tx, &registry, id).await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionClosed));
        assert_eq!(registry.stats().await.unwrap().totals.auth, 1);
    }

    #[tokio::test]
    async fn test_empty_secret_accepts_empty_auth() {
        let (registry, id, tx, _rx) = setup("").await;
        let mut input = frames(vec![
            ClientMessage::Auth(None),
            ClientMessage::Name("al".to_string()),
        ]);

        assert_eq!(negotiate(&mut input, &tx, &registry, id).await.unwrap(), "al");
    }

    #[tokio::test]
    async fn test_taken_and_empty_names_retry() {
        let (registry, id, tx, mut rx) = setup("").await;
        let (other_tx, _other_rx) = mpsc::unbounded_channel();
        let other = registry.register(other_tx, DeletedFlag::new()).await.unwrap();
        registry.claim_name(other, "al".to_string()).await.unwrap();

        let mut input = frames(vec![
            ClientMessage::Auth(None),
            ClientMessage::Name("al".to_string()),
            ClientMessage::EmptyName,
            ClientMessage::Name("al0".to_string()),
        ]);

        assert_eq!(negotiate(&mut input, &tx, &registry, id).await.unwrap(), "al0");
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerMessage::Auth,
                ServerMessage::Ok,
                ServerMessage::Who,
                ServerMessage::NameTaken,
                ServerMessage::Who,
                ServerMessage::NameTaken,
                ServerMessage::Who,
                ServerMessage::Ok,
                ServerMessage::Enter("al0".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_leave_during_name_aborts() {
        let (registry, id, tx, _rx) = setup("").await;
        let mut input = frames(vec![ClientMessage::Auth(None), ClientMessage::Leave]);

        let err = negotiate(&mut input, &tx, &registry, id).await.unwrap_err();
        assert!(matches!(err, AppError::Abandoned));
        assert!(registry.snapshot_sorted_names().await.unwrap().is_empty());
        assert_eq!(registry.stats().await.unwrap().totals.name, 0);
    }

    #[tokio::test]
    async fn test_wrong_frame_during_name_is_violation() {
        let (registry, id, tx, _rx) = setup("").await;
        let mut input = frames(vec![
            ClientMessage::Auth(None),
            ClientMessage::Say("hi".to_string()),
        ]);

        let err = negotiate(&mut input, &tx, &registry, id).await.unwrap_err();
        assert!(matches!(err, AppError::ProtocolViolation { expected: "NAME", .. }));
    }
}
