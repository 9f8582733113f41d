/// Typed error hierarchy for relay operations.
/// Classifies errors by which side of the relay they end: the connect attempt,
/// the client channel, or a single message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    // Fatal to a connect attempt
    #[error("configuration error: {0}")]
    Config(String),
    #[error("connection error: {0}")]
    Connection(String),

    // Fatal to a relay session
    #[error("channel error: {0}")]
    Channel(String),

    // Per-message, logged and dropped
    #[error("decode error: {0}")]
    Decode(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("reply generation failed: {0}")]
    Engine(String),
}

impl RelayError {
    /// Whether this error is scoped to a single message and must not tear
    /// anything down.
    pub fn is_isolated(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Publish(_) | Self::Engine(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Connection(_) => "connection_error",
            Self::Channel(_) => "channel_error",
            Self::Decode(_) => "decode_error",
            Self::Publish(_) => "publish_failure",
            Self::Engine(_) => "engine_error",
        }
    }

    /// Human-readable close reason sent to the client. Never carries the
    /// internal error text.
    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::Config(_) => "Session unavailable: server configuration error",
            Self::Connection(_) => "Session unavailable: could not join room",
            Self::Channel(_) => "Connection error",
            Self::Decode(_) | Self::Publish(_) | Self::Engine(_) => "Internal error",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
