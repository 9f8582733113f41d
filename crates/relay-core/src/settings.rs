//! Process-wide settings.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. Merge the optional JSON settings file over the defaults
//! 3. Merge `RELAY_`-prefixed environment variables (highest priority),
//!    nested with `__`, e.g. `RELAY_TRANSPORT__API_KEY`
//!
//! Settings are loaded once at startup and shared behind an `Arc`. Missing
//! transport credentials are not a load error; they surface when a session
//! grant is requested.

use std::path::Path;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::Identity;
use crate::security::ApiCredentials;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "RELAY_";

/// Room joined when none is requested.
pub const DEFAULT_ROOM: &str = "demo-room";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub transport: TransportSettings,
    pub relay: RelayPolicy,
    pub reconnect: ReconnectSettings,
    pub engine: EngineSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Outbound frames buffered per client before writes apply backpressure.
    pub max_send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_send_queue: 256,
        }
    }
}

/// Real-time session transport settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Address of the session transport.
    pub host: String,
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    /// Lifetime of issued grants.
    pub grant_ttl_secs: u64,
}

impl TransportSettings {
    /// Signing credentials, or a configuration error naming what is missing.
    pub fn credentials(&self) -> Result<ApiCredentials, RelayError> {
        ApiCredentials::from_parts(self.api_key.as_deref(), self.api_secret.as_deref())
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            host: "local://relay".into(),
            api_key: None,
            api_secret: None,
            grant_ttl_secs: 6 * 60 * 60,
        }
    }
}

impl std::fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSettings")
            .field("host", &self.host)
            .field("api_key", &self.api_key)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .field("grant_ttl_secs", &self.grant_ttl_secs)
            .finish()
    }
}

/// How a relay session names itself in the room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Every connection joins as the same identity. Collides when two clients
    /// share a room.
    Shared,
    #[default]
    PerConnection,
}

/// Per-connection relay behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayPolicy {
    pub room: String,
    pub identity_mode: IdentityMode,
    pub shared_identity: String,
    pub identity_prefix: String,
    /// Also write replies generated for session-originated data to the client.
    pub forward_session_replies_to_client: bool,
}

impl RelayPolicy {
    /// Identity a new relay session joins with.
    pub fn identity_for_connection(&self) -> Identity {
        match self.identity_mode {
            IdentityMode::Shared => Identity::new(self.shared_identity.clone()),
            IdentityMode::PerConnection => Identity::unique(&self.identity_prefix),
        }
    }
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            room: DEFAULT_ROOM.into(),
            identity_mode: IdentityMode::default(),
            shared_identity: "chatbot-agent".into(),
            identity_prefix: "agent".into(),
            forward_session_replies_to_client: false,
        }
    }
}

/// Client reconnection backoff.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 3000,
            max_delay_ms: 10_000,
            max_attempts: 5,
        }
    }
}

/// Reply engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub reply_prefix: String,
    /// Retries around each generation (0 disables the retry wrapper).
    pub max_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reply_prefix: "Echo: ".into(),
            max_retries: 2,
        }
    }
}

/// Load settings from defaults, an optional JSON file, and the environment.
pub fn load_settings(path: Option<&Path>) -> Result<RelaySettings, RelayError> {
    let mut figment = Figment::from(Serialized::defaults(RelaySettings::default()));
    if let Some(path) = path {
        figment = figment.merge(Json::file(path));
    }
    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| RelayError::Config(e.to_string()))
}
