use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::Identity;

/// How a data packet travels through the session transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    /// Retransmitted until acknowledged by every current subscriber.
    Reliable,
    /// Best effort, may be dropped.
    Lossy,
}

impl DeliveryKind {
    pub fn from_reliable(reliable: bool) -> Self {
        if reliable {
            Self::Reliable
        } else {
            Self::Lossy
        }
    }
}

/// Events delivered by a session transport to the participant that joined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    PeerJoined {
        identity: Identity,
    },
    PeerLeft {
        identity: Identity,
    },
    DataReceived {
        payload: Bytes,
        /// `None` when the packet was published by the server itself.
        sender: Option<Identity>,
        kind: DeliveryKind,
    },
}

impl InboundEvent {
    /// Event name as it appears in logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PeerJoined { .. } => "peer_joined",
            Self::PeerLeft { .. } => "peer_left",
            Self::DataReceived { .. } => "data_received",
        }
    }
}

/// Lifecycle of a session connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}
