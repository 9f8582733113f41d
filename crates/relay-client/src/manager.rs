//! Client-side channel lifecycle with reconnect-with-backoff.
//!
//! A driver task owns the one live channel. Unrequested closes and failed
//! opens schedule a reconnect through [`ReconnectState`]; after the attempt
//! ceiling the driver goes idle and emits [`ClientEvent::GaveUp`] until
//! [`ClientChannelManager::reinitialize`] is called.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use relay_core::channel::{ChannelRead, DuplexChannel, NORMAL_CLOSURE};
use relay_core::errors::RelayError;

use crate::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};

const CLIENT_CLOSE_REASON: &str = "Client closed";

/// Opens a fresh duplex channel to the relay.
#[async_trait]
pub trait ChannelConnector: Send + Sync + 'static {
    type Channel: DuplexChannel + 'static;

    async fn connect(&self) -> Result<Self::Channel, RelayError>;
}

/// Lifecycle notifications from the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Message(String),
    Disconnected { code: Option<u16>, reason: String },
    ConnectFailed(RelayError),
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Terminal until `reinitialize`.
    GaveUp { attempts: u32 },
}

enum Command {
    Send(String, oneshot::Sender<Result<(), RelayError>>),
    Close,
    Reinitialize,
}

/// Handle to the driver task.
pub struct ClientChannelManager {
    commands: mpsc::UnboundedSender<Command>,
    driver: JoinHandle<()>,
}

impl ClientChannelManager {
    /// Spawn the driver and open the first channel.
    pub fn start<C: ChannelConnector>(
        connector: C,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            connector,
            state: ReconnectState::new(policy),
            commands: command_rx,
            events,
        };
        let driver = tokio::spawn(driver.run());
        (Self { commands, driver }, event_rx)
    }

    /// Send text on the live channel. Fails when no channel is open.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), RelayError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send(text.into(), tx))
            .map_err(|_| RelayError::Channel("client manager stopped".into()))?;
        rx.await
            .map_err(|_| RelayError::Channel("client manager stopped".into()))?
    }

    /// Close the channel on request. No reconnect follows.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Drop any pending reconnect, clear the attempt counter and the give-up
    /// state, and open a new channel now.
    pub fn reinitialize(&self) {
        let _ = self.commands.send(Command::Reinitialize);
    }

    pub fn is_running(&self) -> bool {
        !self.driver.is_finished()
    }
}

impl Drop for ClientChannelManager {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

enum Link<T> {
    Open(T),
    /// Reconnect due at the deadline.
    Waiting(Instant),
    /// Closed on request, or gave up.
    Idle,
}

enum Step {
    Read(ChannelRead),
    Command(Option<Command>),
    Due,
}

struct Driver<C: ChannelConnector> {
    connector: C,
    state: ReconnectState,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<C: ChannelConnector> Driver<C> {
    async fn run(mut self) {
        let mut link = self.open().await;
        loop {
            let step = match &mut link {
                Link::Open(channel) => tokio::select! {
                    read = channel.recv() => Step::Read(read),
                    cmd = self.commands.recv() => Step::Command(cmd),
                },
                Link::Waiting(deadline) => tokio::select! {
                    _ = tokio::time::sleep_until(*deadline) => Step::Due,
                    cmd = self.commands.recv() => Step::Command(cmd),
                },
                Link::Idle => Step::Command(self.commands.recv().await),
            };

            link = match step {
                Step::Read(read) => self.on_read(read, link),
                Step::Due => self.open().await,
                Step::Command(None) => {
                    if let Link::Open(mut channel) = link {
                        let _ = channel.close(NORMAL_CLOSURE, CLIENT_CLOSE_REASON).await;
                    }
                    debug!("client manager handle dropped, driver stopping");
                    return;
                }
                Step::Command(Some(cmd)) => self.on_command(cmd, link).await,
            };
        }
    }

    fn on_read(&mut self, read: ChannelRead, link: Link<C::Channel>) -> Link<C::Channel> {
        match read {
            ChannelRead::Text(text) => {
                self.emit(ClientEvent::Message(text));
                link
            }
            ChannelRead::Closed { code, reason } => {
                warn!(?code, reason = %reason, "channel closed unexpectedly");
                self.emit(ClientEvent::Disconnected { code, reason });
                self.schedule()
            }
            ChannelRead::Failed(err) => {
                warn!(error = %err, "channel failed");
                self.emit(ClientEvent::Disconnected {
                    code: None,
                    reason: err.to_string(),
                });
                self.schedule()
            }
        }
    }

    async fn on_command(&mut self, cmd: Command, link: Link<C::Channel>) -> Link<C::Channel> {
        match (cmd, link) {
            (Command::Send(text, reply), Link::Open(mut channel)) => {
                let _ = reply.send(channel.send_text(&text).await);
                Link::Open(channel)
            }
            (Command::Send(_, reply), link) => {
                let _ = reply.send(Err(RelayError::Channel("not connected".into())));
                link
            }
            (Command::Close, link) => {
                self.state.cancel_pending();
                if let Link::Open(mut channel) = link {
                    if let Err(err) = channel.close(NORMAL_CLOSURE, CLIENT_CLOSE_REASON).await {
                        debug!(error = %err, "close failed");
                    }
                    self.emit(ClientEvent::Disconnected {
                        code: Some(NORMAL_CLOSURE),
                        reason: CLIENT_CLOSE_REASON.into(),
                    });
                }
                info!("channel closed on request");
                Link::Idle
            }
            (Command::Reinitialize, link) => {
                if let Link::Open(mut channel) = link {
                    let _ = channel.close(NORMAL_CLOSURE, CLIENT_CLOSE_REASON).await;
                }
                info!(attempts = self.state.attempts(), "reinitializing client channel");
                self.state.reset();
                self.open().await
            }
        }
    }

    async fn open(&mut self) -> Link<C::Channel> {
        match self.connector.connect().await {
            Ok(channel) => {
                self.state.on_open();
                info!("channel open");
                self.emit(ClientEvent::Connected);
                Link::Open(channel)
            }
            Err(err) => {
                warn!(error = %err, "channel open failed");
                self.emit(ClientEvent::ConnectFailed(err));
                self.schedule()
            }
        }
    }

    fn schedule(&mut self) -> Link<C::Channel> {
        match self.state.on_unexpected_close(Instant::now()) {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                self.emit(ClientEvent::ReconnectScheduled { attempt, delay });
                match self.state.deadline() {
                    Some(deadline) => Link::Waiting(deadline),
                    None => Link::Waiting(Instant::now() + delay),
                }
            }
            ReconnectDecision::GiveUp { attempts } => {
                warn!(attempts, "giving up on reconnect, reinitialize to retry");
                self.emit(ClientEvent::GaveUp { attempts });
                Link::Idle
            }
        }
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
