//! Error types for the chat lobby
//!
//! Defines connection-level errors, codec errors and outbound send errors.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Exit status: normal termination
pub const EXIT_OK: u8 = 0;
/// Exit status: bad arguments or unreadable auth file
pub const EXIT_BAD_ARGS: u8 = 1;
/// Exit status: communications error
pub const EXIT_COMMS: u8 = 2;
/// Exit status: kicked by another chatter
pub const EXIT_KICKED: u8 = 3;
/// Exit status: the server rejected our secret
pub const EXIT_AUTH: u8 = 4;

/// Application-level errors
///
/// Every variant terminates exactly one connection. Malformed frames are
/// not represented here: they decode to `Invalid` messages and the caller
/// decides whether the current protocol phase makes them fatal.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error on the wire (fatal)
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The registry owner task is gone (fatal - internal channel broken)
    #[error("registry closed")]
    RegistryClosed,

    /// Peer reached end-of-stream outside a deliberate LEAVE
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Shared secret mismatch
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A frame of the wrong kind arrived during the handshake
    #[error("protocol violation: expected {expected}, received {received}")]
    ProtocolViolation {
        expected: &'static str,
        received: String,
    },

    /// Peer sent LEAVE before finishing name negotiation
    #[error("peer left during handshake")]
    Abandoned,

    /// Removed by another chatter's KICK
    #[error("kicked")]
    Kicked,

    /// The auth file could not be read
    #[error("cannot read auth file {}: {source}", path.display())]
    AuthFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl AppError {
    /// Process exit status for a client terminated by this error
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::AuthFile { .. } => EXIT_BAD_ARGS,
            AppError::Kicked => EXIT_KICKED,
            AppError::AuthenticationFailed => EXIT_AUTH,
            AppError::Abandoned => EXIT_OK,
            AppError::Io(_)
            | AppError::Codec(_)
            | AppError::RegistryClosed
            | AppError::ConnectionClosed
            | AppError::ProtocolViolation { .. } => EXIT_COMMS,
        }
    }

    /// Whether this termination should be logged as a communications error
    pub fn is_comms_failure(&self) -> bool {
        self.exit_code() == EXIT_COMMS
    }
}

/// Line framing errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// A single line exceeded the maximum frame length
    #[error("line exceeds maximum length ({max} bytes)")]
    LineTooLong { max: usize },

    /// `Invalid` messages have no wire form
    #[error("cannot encode an invalid message")]
    Unencodable,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Message send errors
///
/// Occurs when attempting to queue a frame to a session's writer task.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
