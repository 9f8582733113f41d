use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::engine::ReplyEngine;
use relay_core::errors::RelayError;
use relay_core::events::{ConnectionState, InboundEvent};
use relay_core::ids::Identity;

use crate::grant::{GrantCapabilities, GrantIssuer};
use crate::transport::{RoomHandle, SessionTransport};

const EVENT_BUFFER: usize = 64;

/// Events re-broadcast to bridge subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    Inbound(InboundEvent),
    /// A reply to session-originated data was published into the session.
    SessionReply { text: String },
    /// The transport closed the event stream without a local disconnect.
    SessionEnded,
}

/// Snapshot of the session a bridge holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub local_identity: Identity,
    pub state: ConnectionState,
}

struct ActiveSession {
    room: Arc<dyn RoomHandle>,
    pump: JoinHandle<()>,
    cancel: CancellationToken,
    ended: CancellationToken,
}

/// Owns at most one session connection and answers data arriving on it.
///
/// Inbound data is decoded and handed to the reply engine on its own task,
/// one task per event, so a slow generation never stalls event delivery.
pub struct SessionBridge {
    issuer: Arc<GrantIssuer>,
    transport: Arc<dyn SessionTransport>,
    engine: Arc<dyn ReplyEngine>,
    host: String,
    agent_prefix: Option<String>,
    state: ConnectionState,
    active: Option<ActiveSession>,
    events: broadcast::Sender<BridgeEvent>,
}

impl SessionBridge {
    pub fn new(
        issuer: Arc<GrantIssuer>,
        transport: Arc<dyn SessionTransport>,
        engine: Arc<dyn ReplyEngine>,
        host: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            issuer,
            transport,
            engine,
            host: host.into(),
            agent_prefix: None,
            state: ConnectionState::Disconnected,
            active: None,
            events,
        }
    }

    /// Do not answer data from senders named like [`Identity::unique`]
    /// output for `prefix`, so two relay agents sharing a room never reply
    /// to each other.
    pub fn with_agent_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.agent_prefix = Some(prefix.into());
        self
    }

    pub fn state(&self) -> ConnectionState {
        match &self.active {
            Some(active) if active.ended.is_cancelled() => ConnectionState::Disconnected,
            _ => self.state,
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.active.as_ref().map(|active| Session {
            name: active.room.name().to_string(),
            local_identity: active.room.local_identity().clone(),
            state: self.state(),
        })
    }

    /// Cancelled when the open session ends without [`SessionBridge::disconnect`],
    /// e.g. the service removed this participant or the room closed.
    pub fn session_ended(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|active| active.ended.clone())
    }

    /// Receive inbound events and session replies from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Join `session_name` as `identity`. An open session is left first.
    pub async fn connect(
        &mut self,
        session_name: &str,
        identity: Identity,
    ) -> Result<Session, RelayError> {
        if self.active.is_some() {
            warn!("connect called with an open session, disconnecting it first");
            self.disconnect().await;
        }

        self.state = ConnectionState::Connecting;
        let joined = match self
            .issuer
            .issue(&identity, session_name, GrantCapabilities::default())
        {
            Ok(grant) => self.transport.connect(&self.host, &grant).await,
            Err(err) => Err(err),
        };

        let connection = match joined {
            Ok(connection) => connection,
            Err(err) => {
                self.state = ConnectionState::Disconnected;
                warn!(
                    room = session_name,
                    identity = %identity,
                    error = %err,
                    kind = err.error_kind(),
                    "failed to join session"
                );
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let ended = CancellationToken::new();
        let dispatcher = ReplyDispatcher {
            engine: Arc::clone(&self.engine),
            room: Arc::clone(&connection.room),
            events: self.events.clone(),
            cancel: cancel.clone(),
            agent_prefix: self.agent_prefix.clone(),
        };
        let pump = tokio::spawn(run_event_pump(connection.events, dispatcher, ended.clone()));

        info!(room = session_name, identity = %identity, "connected to session");
        self.active = Some(ActiveSession {
            room: connection.room,
            pump,
            cancel,
            ended,
        });
        self.state = ConnectionState::Connected;

        Ok(Session {
            name: session_name.to_string(),
            local_identity: identity,
            state: self.state,
        })
    }

    /// Leave the session if one is open. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("disconnect called without an open session");
            self.state = ConnectionState::Disconnected;
            return;
        };

        active.cancel.cancel();
        active.pump.abort();
        active.room.disconnect().await;
        self.state = ConnectionState::Disconnected;
        info!(room = active.room.name(), "disconnected from session");
    }

    /// Publish `text` reliably to everyone in the session. Returns `false`
    /// when no session is open or the publish fails.
    pub async fn send_message(&self, text: &str) -> bool {
        let Some(active) = &self.active else {
            warn!("cannot send message: no session connected");
            return false;
        };

        info!(room = active.room.name(), len = text.len(), "sending message to session");
        match active
            .room
            .publish_data(Bytes::copy_from_slice(text.as_bytes()), true)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(room = active.room.name(), error = %err, "publish failed");
                false
            }
        }
    }
}

impl Drop for SessionBridge {
    fn drop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        active.pump.abort();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let room = active.room;
            handle.spawn(async move { room.disconnect().await });
        }
    }
}

/// Everything a reply task needs, cloned per inbound event.
#[derive(Clone)]
struct ReplyDispatcher {
    engine: Arc<dyn ReplyEngine>,
    room: Arc<dyn RoomHandle>,
    events: broadcast::Sender<BridgeEvent>,
    cancel: CancellationToken,
    agent_prefix: Option<String>,
}

impl ReplyDispatcher {
    fn handle(&self, event: InboundEvent) {
        debug!(room = self.room.name(), event = event.event_type(), "session event");
        // No subscribers is fine.
        let _ = self.events.send(BridgeEvent::Inbound(event.clone()));

        match event {
            InboundEvent::PeerJoined { identity } => {
                info!(room = self.room.name(), identity = %identity, "participant connected");
            }
            InboundEvent::PeerLeft { identity } => {
                info!(room = self.room.name(), identity = %identity, "participant disconnected");
            }
            InboundEvent::DataReceived {
                payload,
                sender,
                kind,
            } => {
                let sender_name = sender.as_ref().map(Identity::as_str).unwrap_or("server");
                let text = match decode_text(&payload) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(sender = sender_name, error = %err, "dropping undecodable session payload");
                        return;
                    }
                };
                if self.is_agent(sender.as_ref()) {
                    debug!(sender = sender_name, "ignoring data from another relay agent");
                    return;
                }
                info!(sender = sender_name, ?kind, len = text.len(), "received session message");
                self.spawn_reply(text);
            }
        }
    }

    fn is_agent(&self, sender: Option<&Identity>) -> bool {
        match (&self.agent_prefix, sender) {
            (Some(prefix), Some(sender)) => sender.is_unique_for(prefix),
            _ => false,
        }
    }

    fn spawn_reply(&self, text: String) {
        let this = self.clone();
        tokio::spawn(async move {
            let generated = tokio::select! {
                _ = this.cancel.cancelled() => return,
                generated = this.engine.generate(&text) => generated,
            };
            let reply = match generated {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(engine = this.engine.name(), error = %err, "reply generation failed");
                    return;
                }
            };
            if this.cancel.is_cancelled() {
                return;
            }
            match this
                .room
                .publish_data(Bytes::copy_from_slice(reply.as_bytes()), true)
                .await
            {
                Ok(()) => {
                    let _ = this.events.send(BridgeEvent::SessionReply { text: reply });
                }
                Err(err) => warn!(room = this.room.name(), error = %err, "failed to publish reply"),
            }
        });
    }
}

async fn run_event_pump(
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
    dispatcher: ReplyDispatcher,
    ended: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = dispatcher.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => dispatcher.handle(event),
                None => {
                    warn!(room = dispatcher.room.name(), "session event stream ended, session lost");
                    dispatcher.cancel.cancel();
                    ended.cancel();
                    let _ = dispatcher.events.send(BridgeEvent::SessionEnded);
                    break;
                }
            },
        }
    }
}

fn decode_text(payload: &[u8]) -> Result<String, RelayError> {
    std::str::from_utf8(payload)
        .map(str::to_owned)
        .map_err(|e| RelayError::Decode(e.to_string()))
}
