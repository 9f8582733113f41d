//! In-process session transport.
//!
//! Rooms live in memory and fan data out to every other participant. Grants
//! are verified exactly as a remote service would, so the relay exercises the
//! same join path with or without an external service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use relay_core::errors::RelayError;
use relay_core::events::{DeliveryKind, InboundEvent};
use relay_core::ids::Identity;
use relay_core::security::ApiCredentials;

use crate::grant::{GrantVerifier, SessionGrant};
use crate::transport::{RoomConnection, RoomHandle, SessionTransport};

/// Host scheme served by [`LocalHub`].
pub const LOCAL_SCHEME: &str = "local://";

struct Participant {
    tx: mpsc::UnboundedSender<InboundEvent>,
    can_subscribe: bool,
}

#[derive(Default)]
struct RoomState {
    participants: DashMap<Identity, Participant>,
}

impl RoomState {
    /// Deliver `event` to every subscribed participant except `skip`.
    fn fan_out(&self, skip: Option<&Identity>, event: &InboundEvent) -> usize {
        let mut delivered = 0;
        for entry in self.participants.iter() {
            if Some(entry.key()) == skip || !entry.value().can_subscribe {
                continue;
            }
            if entry.value().tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// In-memory rooms keyed by name.
pub struct LocalHub {
    verifier: Option<GrantVerifier>,
    rooms: DashMap<String, Arc<RoomState>>,
}

impl LocalHub {
    /// Without credentials the hub cannot verify grants and refuses every
    /// join.
    pub fn new(credentials: Option<ApiCredentials>) -> Self {
        Self {
            verifier: credentials.map(GrantVerifier::new),
            rooms: DashMap::new(),
        }
    }

    /// Identities currently in `room`, sorted.
    pub fn participants(&self, room: &str) -> Vec<Identity> {
        let mut out: Vec<Identity> = self
            .rooms
            .get(room)
            .map(|state| state.participants.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    fn room_state(&self, room: &str) -> Arc<RoomState> {
        Arc::clone(&self.rooms.entry(room.to_string()).or_default())
    }
}

#[async_trait]
impl SessionTransport for LocalHub {
    async fn connect(&self, host: &str, grant: &SessionGrant) -> Result<RoomConnection, RelayError> {
        if !host.starts_with(LOCAL_SCHEME) {
            return Err(RelayError::Connection(format!(
                "unsupported transport host: {host}"
            )));
        }
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| RelayError::Connection("transport has no signing key".into()))?;
        let claims = verifier.verify(grant)?;
        if !claims.video.room_join {
            return Err(RelayError::Connection("grant does not allow joining".into()));
        }

        let identity = claims.identity();
        let room_name = claims.video.room.clone();
        let state = self.room_state(&room_name);
        let (tx, events) = mpsc::unbounded_channel();

        match state.participants.entry(identity.clone()) {
            Entry::Occupied(_) => {
                return Err(RelayError::Connection(format!(
                    "identity {identity} is already in room {room_name}"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Participant {
                    tx,
                    can_subscribe: claims.video.can_subscribe,
                });
            }
        }

        state.fan_out(
            Some(&identity),
            &InboundEvent::PeerJoined {
                identity: identity.clone(),
            },
        );
        info!(room = %room_name, identity = %identity, "participant joined local room");

        let room = LocalRoom {
            name: room_name,
            identity,
            state,
            can_publish: claims.video.can_publish,
            connected: AtomicBool::new(true),
        };
        Ok(RoomConnection {
            room: Arc::new(room),
            events,
        })
    }
}

struct LocalRoom {
    name: String,
    identity: Identity,
    state: Arc<RoomState>,
    can_publish: bool,
    connected: AtomicBool,
}

#[async_trait]
impl RoomHandle for LocalRoom {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_identity(&self) -> &Identity {
        &self.identity
    }

    async fn publish_data(&self, payload: Bytes, reliable: bool) -> Result<(), RelayError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(RelayError::Publish("not connected to room".into()));
        }
        if !self.can_publish {
            return Err(RelayError::Publish("grant does not allow publishing".into()));
        }
        let delivered = self.state.fan_out(
            Some(&self.identity),
            &InboundEvent::DataReceived {
                payload,
                sender: Some(self.identity.clone()),
                kind: DeliveryKind::from_reliable(reliable),
            },
        );
        debug!(room = %self.name, identity = %self.identity, delivered, "published data");
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.state.participants.remove(&self.identity);
        self.state.fan_out(
            None,
            &InboundEvent::PeerLeft {
                identity: self.identity.clone(),
            },
        );
        info!(room = %self.name, identity = %self.identity, "participant left local room");
    }
}
