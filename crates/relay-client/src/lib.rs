//! Client side of the relay: a duplex channel kept open with
//! reconnect-with-backoff.

pub mod manager;
pub mod reconnect;
pub mod ws;

pub use manager::{ChannelConnector, ClientChannelManager, ClientEvent};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};
pub use ws::{WsClientChannel, WsConnector};
