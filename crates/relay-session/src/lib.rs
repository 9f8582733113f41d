//! Real-time session side of the relay: grants, the transport seam with its
//! in-process and LiveKit implementations, and the bridge that owns one
//! joined session.

pub mod bridge;
pub mod grant;
pub mod local;
#[cfg(feature = "livekit")]
pub mod remote;
pub mod transport;

pub use bridge::{BridgeEvent, Session, SessionBridge};
pub use grant::{GrantCapabilities, GrantIssuer, GrantVerifier, SessionGrant};
pub use local::LocalHub;
#[cfg(feature = "livekit")]
pub use remote::LiveKitTransport;
pub use transport::{transport_for_host, RoomConnection, RoomHandle, SessionTransport};
