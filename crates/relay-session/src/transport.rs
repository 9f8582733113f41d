use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use relay_core::errors::RelayError;
use relay_core::events::InboundEvent;
use relay_core::ids::Identity;
use relay_core::security::ApiCredentials;

use crate::grant::SessionGrant;
use crate::local::{LocalHub, LOCAL_SCHEME};

/// A joined room as seen by the local participant.
#[async_trait]
pub trait RoomHandle: Send + Sync {
    fn name(&self) -> &str;

    fn local_identity(&self) -> &Identity;

    /// Send `payload` to every other participant in the room.
    async fn publish_data(&self, payload: Bytes, reliable: bool) -> Result<(), RelayError>;

    /// Leave the room. Calling it again is a no-op.
    async fn disconnect(&self);
}

/// A live room plus the stream of events addressed to the local participant.
/// The stream ends when the participant leaves.
pub struct RoomConnection {
    pub room: Arc<dyn RoomHandle>,
    pub events: mpsc::UnboundedReceiver<InboundEvent>,
}

/// Joins rooms on a real-time session service.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Join the room named in `grant`. Fails with `RelayError::Connection`
    /// when the service rejects the grant or cannot be reached.
    async fn connect(&self, host: &str, grant: &SessionGrant) -> Result<RoomConnection, RelayError>;
}

/// Pick the transport serving `host` by scheme: `local://` joins in-process
/// rooms, `ws://` and `wss://` join a LiveKit server.
pub fn transport_for_host(
    host: &str,
    credentials: Option<ApiCredentials>,
) -> Result<Arc<dyn SessionTransport>, RelayError> {
    if host.starts_with(LOCAL_SCHEME) {
        return Ok(Arc::new(LocalHub::new(credentials)));
    }
    if host.starts_with("ws://") || host.starts_with("wss://") {
        return remote_transport(host);
    }
    Err(RelayError::Config(format!(
        "unsupported transport host {host}: expected local://, ws:// or wss://"
    )))
}

#[cfg(feature = "livekit")]
fn remote_transport(_host: &str) -> Result<Arc<dyn SessionTransport>, RelayError> {
    Ok(Arc::new(crate::remote::LiveKitTransport))
}

#[cfg(not(feature = "livekit"))]
fn remote_transport(host: &str) -> Result<Arc<dyn SessionTransport>, RelayError> {
    Err(RelayError::Config(format!(
        "transport host {host} needs LiveKit support; rebuild with `--features livekit`"
    )))
}
