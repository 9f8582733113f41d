//! LiveKit session transport.
//!
//! Joins rooms on a LiveKit server with the grant as the access token. Room
//! events are translated into [`InboundEvent`]s on a forwarding task; the
//! event stream ends when the server disconnects the participant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use livekit::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relay_core::errors::RelayError;
use relay_core::events::{DeliveryKind, InboundEvent};
use relay_core::ids::Identity;

use crate::grant::SessionGrant;
use crate::transport::{RoomConnection, RoomHandle, SessionTransport};

/// Joins rooms on a LiveKit server at `ws://` or `wss://` hosts.
#[derive(Clone, Copy, Debug, Default)]
pub struct LiveKitTransport;

#[async_trait]
impl SessionTransport for LiveKitTransport {
    async fn connect(&self, host: &str, grant: &SessionGrant) -> Result<RoomConnection, RelayError> {
        let (room, room_events) = Room::connect(host, grant.as_str(), RoomOptions::default())
            .await
            .map_err(|e| RelayError::Connection(format!("failed to join room at {host}: {e}")))?;

        let name = room.name();
        let identity = Identity::new(room.local_participant().identity().0);
        info!(room = %name, identity = %identity, host, "joined livekit room");

        let (tx, events) = mpsc::unbounded_channel();
        tokio::spawn(forward_room_events(room_events, tx, name.clone()));

        Ok(RoomConnection {
            room: Arc::new(LiveKitRoom {
                room,
                name,
                identity,
                connected: AtomicBool::new(true),
            }),
            events,
        })
    }
}

async fn forward_room_events(
    mut room_events: mpsc::UnboundedReceiver<RoomEvent>,
    tx: mpsc::UnboundedSender<InboundEvent>,
    room: String,
) {
    while let Some(event) = room_events.recv().await {
        let inbound = match event {
            RoomEvent::ParticipantConnected(participant) => InboundEvent::PeerJoined {
                identity: identity_of(&participant),
            },
            RoomEvent::ParticipantDisconnected(participant) => InboundEvent::PeerLeft {
                identity: identity_of(&participant),
            },
            RoomEvent::DataReceived {
                payload,
                kind,
                participant,
                ..
            } => InboundEvent::DataReceived {
                payload: Bytes::copy_from_slice(&payload),
                sender: participant.as_ref().map(identity_of),
                kind: DeliveryKind::from_reliable(matches!(kind, DataPacketKind::Reliable)),
            },
            RoomEvent::Disconnected { .. } => {
                info!(room = %room, "livekit room disconnected");
                break;
            }
            _ => continue,
        };
        if tx.send(inbound).is_err() {
            break;
        }
    }
    debug!(room = %room, "livekit event forwarding stopped");
}

fn identity_of(participant: &RemoteParticipant) -> Identity {
    Identity::new(participant.identity().0)
}

struct LiveKitRoom {
    room: Room,
    name: String,
    identity: Identity,
    connected: AtomicBool,
}

#[async_trait]
impl RoomHandle for LiveKitRoom {
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
        let packet = DataPacket {
            payload: payload.to_vec(),
            reliable,
            ..Default::default()
        };
        self.room
            .local_participant()
            .publish_data(packet)
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(err) = self.room.close().await {
            warn!(room = %self.name, error = %err, "livekit room did not close cleanly");
        }
        info!(room = %self.name, identity = %self.identity, "left livekit room");
    }
}
