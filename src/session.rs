//! Session struct definition
//!
//! Represents one connected peer as seen by the registry: identity, display
//! name, outbound channel to its writer task, counters and deletion flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Notify};

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::SessionId;

/// Liveness flag shared between the registry and the session's handler
///
/// Set exactly once, when the registry removes the session. The handler
/// can await the transition while it is blocked on a read.
#[derive(Debug, Clone, Default)]
pub struct DeletedFlag(Arc<FlagInner>);

#[derive(Debug, Default)]
struct FlagInner {
    set: AtomicBool,
    notify: Notify,
}

impl DeletedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session has been removed from the registry
    pub fn is_set(&self) -> bool {
        self.0.set.load(Ordering::Acquire)
    }

    /// Resolve once the flag is set
    pub async fn wait(&self) {
        loop {
            let notified = self.0.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Set the flag; returns true only for the first caller
    fn set(&self) -> bool {
        let first = !self.0.set.swap(true, Ordering::AcqRel);
        if first {
            self.0.notify.notify_waiters();
        }
        first
    }
}

/// Per-session command counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub say: u64,
    pub kick: u64,
    pub list: u64,
}

/// Connected session information
///
/// Holds all state related to a connected peer. The registry owns every
/// live `Session`; the handler task only keeps the `DeletedFlag`.
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this session
    pub id: SessionId,
    /// Display name (None until negotiated)
    pub name: Option<String>,
    /// Registry → writer task frame channel
    sender: mpsc::UnboundedSender<ServerMessage>,
    /// SAY / KICK / LIST counts issued by this session
    pub counters: SessionCounters,
    deleted: DeletedFlag,
}

impl Session {
    /// Create a new unnamed session with the given ID and sender channel
    pub fn new(id: SessionId, sender: mpsc::UnboundedSender<ServerMessage>, deleted: DeletedFlag) -> Self {
        Self {
            id,
            name: None,
            sender,
            counters: SessionCounters::default(),
            deleted,
        }
    }

    /// Queue a frame for this session's writer task
    ///
    /// Never waits. Fails only once the writer task has stopped.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Get the display name for this session
    ///
    /// Returns the name if negotiated, otherwise "unnamed".
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Whether this session completed name negotiation and is still live
    pub fn is_admitted(&self) -> bool {
        self.name.is_some() && !self.deleted.is_set()
    }

    /// Whether the live session goes by `name`
    pub fn has_name(&self, name: &str) -> bool {
        !self.deleted.is_set() && self.name.as_deref() == Some(name)
    }

    /// Set the negotiated name
    pub fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    /// Mark the session deleted; returns true the first time only
    pub fn mark_deleted(&self) -> bool {
        self.deleted.set()
    }
}
