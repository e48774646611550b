//! Registry owner task
//!
//! The single task that owns `RegistryState`. Connection handlers talk to it
//! through `RegistryHandle`, which wraps an mpsc command channel; replies
//! come back over oneshot channels. Because every mutation and every
//! consistent read is one command processed in order, the registry needs no
//! lock and never holds one across socket I/O: frames are only queued to
//! each session's writer task.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::AppError;
use crate::message::ServerMessage;
use crate::registry::{KickOutcome, NameClaim, RegistryState};
use crate::session::DeletedFlag;
use crate::stats::StatsSnapshot;
use crate::types::SessionId;

/// Channel buffer size for registry commands
pub const COMMAND_BUFFER_SIZE: usize = 256;

/// Commands sent from handlers to the registry owner task
#[derive(Debug)]
pub enum RegistryCommand {
    /// New connection accepted
    Register {
        sender: mpsc::UnboundedSender<ServerMessage>,
        deleted: DeletedFlag,
        reply: oneshot::Sender<SessionId>,
    },
    /// An AUTH frame was checked
    RecordAuth,
    /// Claim a display name
    ClaimName {
        id: SessionId,
        name: String,
        reply: oneshot::Sender<NameClaim>,
    },
    /// Broadcast a chat line
    Say { id: SessionId, text: String },
    /// Send the sorted name list to the requester
    List { id: SessionId },
    /// Remove the session with the given name
    Kick { id: SessionId, target: String },
    /// Explicit LEAVE
    Leave { id: SessionId },
    /// Handler is exiting
    Disconnect { id: SessionId },
    /// Sorted names of live sessions
    Names { reply: oneshot::Sender<Vec<String>> },
    /// Counter snapshot
    Stats { reply: oneshot::Sender<StatsSnapshot> },
}

/// The registry actor
///
/// Processes commands from connection handlers until every handle is dropped.
pub struct Registry {
    state: RegistryState,
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl Registry {
    /// Create a registry actor reading from the given command receiver
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            state: RegistryState::new(),
            receiver,
        }
    }

    /// Spawn the owner task and return a handle to it
    pub fn spawn(config: ServerConfig) -> RegistryHandle {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);
        tokio::spawn(Registry::new(receiver).run());
        RegistryHandle::new(sender, config)
    }

    /// Run the registry event loop
    pub async fn run(mut self) {
        info!("Registry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Registry shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                sender,
                deleted,
                reply,
            } => {
                let id = self.state.insert(sender, deleted);
                if reply.send(id).is_err() {
                    // Handler gone before it learned its id
                    self.state.remove(id);
                }
            }
            RegistryCommand::RecordAuth => self.state.record_auth(),
            RegistryCommand::ClaimName { id, name, reply } => {
                let claim = self.state.claim_name(id, &name);
                if claim == NameClaim::Admitted {
                    info!("({} has entered the chat)", name);
                }
                let _ = reply.send(claim);
            }
            RegistryCommand::Say { id, text } => {
                if let Some(name) = self.state.say(id, &text) {
                    info!("{}: {}", name, text);
                }
            }
            RegistryCommand::List { id } => self.state.list(id),
            RegistryCommand::Kick { id, target } => match self.state.kick(id, &target) {
                KickOutcome::Kicked(victim) => {
                    info!("({} has left the chat)", target);
                    debug!("Session {} kicked by {}", victim, id);
                }
                KickOutcome::NoSuchTarget => {
                    debug!("Session {} kicked unknown name '{}'", id, target);
                }
            },
            RegistryCommand::Leave { id } => {
                if let Some(name) = self.state.leave(id) {
                    info!("({} has left the chat)", name);
                }
            }
            RegistryCommand::Disconnect { id } => {
                if let Some(name) = self.state.disconnect(id) {
                    info!("({} has left the chat)", name);
                }
            }
            RegistryCommand::Names { reply } => {
                let _ = reply.send(self.state.snapshot_sorted_names());
            }
            RegistryCommand::Stats { reply } => {
                let _ = reply.send(self.state.stats());
            }
        }
    }
}

/// Cloneable handle to the registry owner task
///
/// Also carries the immutable startup configuration (secret, bind address).
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
    config: Arc<ServerConfig>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>, config: ServerConfig) -> Self {
        Self {
            sender,
            config: Arc::new(config),
        }
    }

    /// The shared secret clients must present
    pub fn secret(&self) -> &str {
        &self.config.secret
    }

    async fn send(&self, cmd: RegistryCommand) -> Result<(), AppError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| AppError::RegistryClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply)).await?;
        response.await.map_err(|_| AppError::RegistryClosed)
    }

    /// Insert a new session and learn its id
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<ServerMessage>,
        deleted: DeletedFlag,
    ) -> Result<SessionId, AppError> {
        self.request(|reply| RegistryCommand::Register {
            sender,
            deleted,
            reply,
        })
        .await
    }

    pub async fn record_auth(&self) -> Result<(), AppError> {
        self.send(RegistryCommand::RecordAuth).await
    }

    /// Check-and-assign a name in one registry step
    pub async fn claim_name(&self, id: SessionId, name: String) -> Result<NameClaim, AppError> {
        self.request(|reply| RegistryCommand::ClaimName { id, name, reply })
            .await
    }

    pub async fn say(&self, id: SessionId, text: String) -> Result<(), AppError> {
        self.send(RegistryCommand::Say { id, text }).await
    }

    pub async fn list(&self, id: SessionId) -> Result<(), AppError> {
        self.send(RegistryCommand::List { id }).await
    }

    pub async fn kick(&self, id: SessionId, target: String) -> Result<(), AppError> {
        self.send(RegistryCommand::Kick { id, target }).await
    }

    pub async fn leave(&self, id: SessionId) -> Result<(), AppError> {
        self.send(RegistryCommand::Leave { id }).await
    }

    pub async fn disconnect(&self, id: SessionId) -> Result<(), AppError> {
        self.send(RegistryCommand::Disconnect { id }).await
    }

    /// Lexicographically sorted names of all live, named sessions
    pub async fn snapshot_sorted_names(&self) -> Result<Vec<String>, AppError> {
        self.request(|reply| RegistryCommand::Names { reply }).await
    }

    /// Consistent per-session and total counters
    pub async fn stats(&self) -> Result<StatsSnapshot, AppError> {
        self.request(|reply| RegistryCommand::Stats { reply }).await
    }
}
