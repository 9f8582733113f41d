pub mod channel;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ids;
pub mod security;
pub mod settings;

pub use channel::{ChannelRead, DuplexChannel, NORMAL_CLOSURE};
pub use engine::ReplyEngine;
pub use errors::RelayError;
pub use events::{ConnectionState, DeliveryKind, InboundEvent};
pub use ids::{ConnectionId, Identity};
pub use settings::RelaySettings;
