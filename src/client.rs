//! Client-side mirror
//!
//! Runs the handshake from the other end, then two concurrent loops: one
//! forwards user input to the server, the other prints server broadcasts.
//! The negotiated name is fixed once the handshake returns, so the loops
//! share no lock; their only shared state is the `leaving` flag.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::codec::ClientCodec;
use crate::config::ClientConfig;
use crate::error::{AppError, CodecError};
use crate::message::{ClientMessage, ServerMessage};

/// Lines starting with this byte are sent as raw protocol frames
pub const COMMAND_PREFIX: char = '*';

/// Name to propose after `attempt` collisions (0-based)
///
/// Any trailing digit run of `base` is replaced, so `bob`, `bob7` and
/// `bob12` all retry as `bob0`, `bob1`, `bob2`, ...
pub fn next_candidate(base: &str, attempt: u32) -> String {
    let stem = base.trim_end_matches(|c: char| c.is_ascii_digit());
    format!("{stem}{attempt}")
}

async fn next_frame<S>(frames: &mut S) -> Result<Option<ServerMessage>, AppError>
where
    S: Stream<Item = Result<ServerMessage, CodecError>> + Unpin,
{
    match frames.next().await {
        Some(frame) => Ok(Some(frame?)),
        None => Ok(None),
    }
}

fn unexpected(expected: &'static str, received: &ServerMessage) -> AppError {
    AppError::ProtocolViolation {
        expected,
        received: received.kind().to_string(),
    }
}

/// Authenticate and negotiate a name; returns the name the server accepted
pub async fn handshake<S, K>(
    frames: &mut S,
    sink: &mut K,
    secret: &str,
    name: &str,
) -> Result<String, AppError>
where
    S: Stream<Item = Result<ServerMessage, CodecError>> + Unpin,
    K: Sink<ClientMessage, Error = CodecError> + Unpin,
{
    match next_frame(frames).await? {
        Some(ServerMessage::Auth) => {}
        Some(other) => return Err(unexpected("AUTH", &other)),
        None => return Err(AppError::ConnectionClosed),
    }
    sink.send(ClientMessage::auth(secret)).await?;

    match next_frame(frames).await? {
        Some(ServerMessage::Ok) => debug!("Authenticated"),
        // The server closes without a reply on a bad secret
        _ => return Err(AppError::AuthenticationFailed),
    }

    let mut candidate = name.to_string();
    let mut attempt = 0;
    loop {
        match next_frame(frames).await? {
            Some(ServerMessage::Who) => {
                sink.send(ClientMessage::Name(candidate.clone())).await?;
            }
            Some(ServerMessage::NameTaken) => {
                debug!("Name '{}' taken", candidate);
                candidate = next_candidate(name, attempt);
                attempt += 1;
            }
            Some(ServerMessage::Ok) => return Ok(candidate),
            Some(other) => return Err(unexpected("WHO", &other)),
            None => return Err(AppError::ConnectionClosed),
        }
    }
}

/// Terminal rendering of an inbound frame, if it is shown at all
pub fn render_inbound(msg: &ServerMessage) -> Option<String> {
    match msg {
        ServerMessage::Msg { .. } => msg.payload(),
        ServerMessage::Enter(name) => Some(format!("({name} has entered the chat)")),
        ServerMessage::List(names) => Some(format!("(current chatters: {})", names.join(","))),
        ServerMessage::Leave(name) => Some(format!("({name} has left the chat)")),
        _ => None,
    }
}

/// Turn one line of user input into the frame to send
///
/// `*` introduces a raw command; anything else is chat text. Returns
/// `None` for a raw command that does not parse.
pub fn translate_input(line: &str) -> Option<ClientMessage> {
    match line.strip_prefix(COMMAND_PREFIX) {
        Some(command) => match ClientMessage::parse(command) {
            ClientMessage::Invalid => None,
            msg => Some(msg),
        },
        None => Some(ClientMessage::Say(line.to_string())),
    }
}

/// Print server broadcasts until the connection ends
///
/// End-of-stream is a normal exit only once we have sent `LEAVE:`.
pub async fn relay_inbound<S, W>(
    frames: &mut S,
    out: &mut W,
    leaving: &AtomicBool,
) -> Result<(), AppError>
where
    S: Stream<Item = Result<ServerMessage, CodecError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = next_frame(frames).await? {
        if msg == ServerMessage::Kick {
            return Err(AppError::Kicked);
        }
        if let Some(line) = render_inbound(&msg) {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }
    }

    if leaving.load(Ordering::Acquire) {
        Ok(())
    } else {
        Err(AppError::ConnectionClosed)
    }
}

/// Forward user input until `LEAVE:` is sent or the input ends
///
/// End of input sends `LEAVE:` on the user's behalf.
pub async fn relay_input<R, K>(input: R, sink: &mut K, leaving: &AtomicBool) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    K: Sink<ClientMessage, Error = CodecError> + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let Some(msg) = translate_input(&line) else {
            warn!("Unrecognised command: {}", line);
            continue;
        };
        let is_leave = msg == ClientMessage::Leave;
        if is_leave {
            leaving.store(true, Ordering::Release);
        }
        sink.send(msg).await?;
        if is_leave {
            return Ok(());
        }
    }

    leaving.store(true, Ordering::Release);
    sink.send(ClientMessage::Leave).await?;
    Ok(())
}

/// Connect, negotiate and chat over stdin/stdout until the session ends
pub async fn run(config: ClientConfig) -> Result<(), AppError> {
    let stream = TcpStream::connect(config.server_addr()).await?;
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, ClientCodec::default());
    let mut sink = FramedWrite::new(write_half, ClientCodec::default());

    let name = handshake(&mut frames, &mut sink, &config.secret, &config.name).await?;
    info!("Joined as {}", name);

    let leaving = AtomicBool::new(false);
    let mut stdout = tokio::io::stdout();
    let stdin = BufReader::new(tokio::io::stdin());

    let inbound = relay_inbound(&mut frames, &mut stdout, &leaving);
    tokio::pin!(inbound);

    tokio::select! {
        result = &mut inbound => result,
        // Once LEAVE is out, keep printing until the server closes
        result = relay_input(stdin, &mut sink, &leaving) => match result {
            Ok(()) => inbound.await,
            Err(e) => Err(e),
        },
    }
}
