use async_trait::async_trait;

use crate::errors::RelayError;

/// Close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close frames carry at most 123 bytes of reason text.
pub const MAX_CLOSE_REASON_LEN: usize = 123;

/// Outcome of waiting for the next frame on a duplex channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelRead {
    Text(String),
    /// The peer closed the channel (or the stream ended).
    Closed { code: Option<u16>, reason: String },
    Failed(RelayError),
}

/// A bidirectional text channel with a close handshake.
///
/// Implemented over the server-side WebSocket, the client-side WebSocket, and
/// in-memory doubles in tests.
#[async_trait]
pub trait DuplexChannel: Send {
    /// Wait for the next text message. Control frames are handled internally.
    async fn recv(&mut self) -> ChannelRead;

    async fn send_text(&mut self, text: &str) -> Result<(), RelayError>;

    /// Send a close frame. Closing a channel that is no longer open is a no-op.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), RelayError>;

    fn is_open(&self) -> bool;
}

/// Truncate a close reason to fit a close frame without splitting a char.
pub fn clamp_close_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON_LEN {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
