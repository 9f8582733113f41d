use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Server-side handle for one client connection, `conn_<uuid v7>`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

/// Participant name inside a session. Opaque; uniqueness is only meaningful
/// within one room.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Fresh identity of the form `{prefix}-{uuid}`.
    pub fn unique(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Uuid::now_v7().simple()))
    }

    /// Whether this identity has exactly the shape [`Identity::unique`]
    /// produces for `prefix`.
    pub fn is_unique_for(&self, prefix: &str) -> bool {
        self.0
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|id| {
                id.len() == 32
                    && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
                    && Uuid::try_parse(id).is_ok()
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = ConnectionId::new();
        let parsed: ConnectionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn unique_identity_keeps_prefix() {
        let a = Identity::unique("agent");
        let b = Identity::unique("agent");
        assert!(a.as_str().starts_with("agent-"), "got: {a}");
        assert_ne!(a, b);
    }

    #[test]
    fn unique_shape_is_matched_exactly() {
        let agent = Identity::unique("agent");
        assert!(agent.is_unique_for("agent"));
        assert!(!agent.is_unique_for("bot"));

        assert!(!Identity::new("agent-smith").is_unique_for("agent"));
        assert!(!Identity::new("agent-").is_unique_for("agent"));
        assert!(!Identity::new("agent").is_unique_for("agent"));
        let upper = Uuid::now_v7().simple().to_string().to_uppercase();
        assert!(!Identity::new(format!("agent-{upper}")).is_unique_for("agent"));
        let hyphenated = format!("agent-{}", Uuid::now_v7());
        assert!(!Identity::new(hyphenated).is_unique_for("agent"));
    }

    #[test]
    fn identity_is_transparent_in_json() {
        let id = Identity::new("user-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user-1\"");
    }
}
