//! Session grants: HS256 tokens authorizing one identity in one room.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use relay_core::errors::RelayError;
use relay_core::ids::Identity;
use relay_core::security::ApiCredentials;

/// What the holder of a grant may do in its room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrantCapabilities {
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

impl Default for GrantCapabilities {
    fn default() -> Self {
        Self {
            room_join: true,
            can_publish: true,
            can_subscribe: true,
        }
    }
}

/// Signed grant handed to the session transport. Opaque to the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionGrant(String);

impl SessionGrant {
    pub fn from_raw(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomGrant {
    pub room_join: bool,
    pub room: String,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantClaims {
    /// Api key that signed the grant.
    pub iss: String,
    /// Participant identity.
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: RoomGrant,
}

impl GrantClaims {
    pub fn identity(&self) -> Identity {
        Identity::new(self.sub.clone())
    }
}

/// Issues grants from the configured key pair. Credentials are checked on
/// every issue so a process without them still starts.
#[derive(Clone, Debug)]
pub struct GrantIssuer {
    credentials: Result<ApiCredentials, RelayError>,
    ttl: Duration,
}

impl GrantIssuer {
    pub fn new(credentials: Result<ApiCredentials, RelayError>, ttl: Duration) -> Self {
        Self { credentials, ttl }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_ok()
    }

    pub fn issue(
        &self,
        identity: &Identity,
        room: &str,
        capabilities: GrantCapabilities,
    ) -> Result<SessionGrant, RelayError> {
        let credentials = self.credentials.as_ref().map_err(|e| e.clone())?;

        let now = Utc::now().timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| {
                RelayError::Config(format!("grant ttl of {}s is out of range", self.ttl.as_secs()))
            })?;
        let claims = GrantClaims {
            iss: credentials.api_key.clone(),
            sub: identity.to_string(),
            name: identity.to_string(),
            nbf: now,
            exp,
            video: RoomGrant {
                room_join: capabilities.room_join,
                room: room.to_string(),
                can_publish: capabilities.can_publish,
                can_subscribe: capabilities.can_subscribe,
            },
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(credentials.secret_bytes()),
        )
        .map_err(|e| RelayError::Config(format!("failed to sign grant: {e}")))?;

        Ok(SessionGrant(token))
    }
}

/// Checks grants presented to a transport.
#[derive(Clone, Debug)]
pub struct GrantVerifier {
    credentials: ApiCredentials,
}

impl GrantVerifier {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self { credentials }
    }

    /// Verify signature, issuer and expiry, then return the claims.
    pub fn verify(&self, grant: &SessionGrant) -> Result<GrantClaims, RelayError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.credentials.api_key.as_str()]);
        validation.validate_nbf = true;

        decode::<GrantClaims>(
            grant.as_str(),
            &DecodingKey::from_secret(self.credentials.secret_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| RelayError::Connection(format!("invalid grant: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> ApiCredentials {
        ApiCredentials::new("devkey", "devsecret-with-enough-entropy")
    }

    fn issuer() -> GrantIssuer {
        GrantIssuer::new(Ok(creds()), Duration::from_secs(3600))
    }

    #[test]
    fn issued_grant_verifies() {
        let grant = issuer()
            .issue(&Identity::new("user-1"), "demo-room", GrantCapabilities::default())
            .unwrap();
        let claims = GrantVerifier::new(creds()).verify(&grant).unwrap();
        assert_eq!(claims.iss, "devkey");
        assert_eq!(claims.identity().as_str(), "user-1");
        assert_eq!(claims.name, "user-1");
        assert_eq!(claims.video.room, "demo-room");
        assert!(claims.video.room_join && claims.video.can_publish && claims.video.can_subscribe);
        assert_eq!(claims.exp - claims.nbf, 3600);
    }

    #[test]
    fn missing_credentials_is_config_error() {
        let issuer = GrantIssuer::new(
            Err(RelayError::Config("api key is not set".into())),
            Duration::from_secs(60),
        );
        assert!(!issuer.has_credentials());
        let err = issuer
            .issue(&Identity::new("a"), "room", GrantCapabilities::default())
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn oversized_ttl_is_config_error() {
        let issuer = GrantIssuer::new(Ok(creds()), Duration::from_secs(u64::MAX));
        let err = issuer
            .issue(&Identity::new("a"), "room", GrantCapabilities::default())
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));

        let near_limit = GrantIssuer::new(Ok(creds()), Duration::from_secs(i64::MAX as u64));
        assert!(matches!(
            near_limit.issue(&Identity::new("a"), "room", GrantCapabilities::default()),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let grant = issuer()
            .issue(&Identity::new("a"), "room", GrantCapabilities::default())
            .unwrap();
        let other = GrantVerifier::new(ApiCredentials::new("devkey", "another-secret"));
        assert!(matches!(other.verify(&grant), Err(RelayError::Connection(_))));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let grant = issuer()
            .issue(&Identity::new("a"), "room", GrantCapabilities::default())
            .unwrap();
        let other = GrantVerifier::new(ApiCredentials::new("otherkey", "devsecret-with-enough-entropy"));
        assert!(other.verify(&grant).is_err());
    }

    #[test]
    fn claims_use_camel_case_room_grant() {
        let grant = issuer()
            .issue(
                &Identity::new("a"),
                "room",
                GrantCapabilities {
                    can_publish: false,
                    ..Default::default()
                },
            )
            .unwrap();
        let claims = GrantVerifier::new(creds()).verify(&grant).unwrap();
        assert!(!claims.video.can_publish);
        let json = serde_json::to_value(&claims.video).unwrap();
        assert_eq!(json["roomJoin"], true);
        assert_eq!(json["canPublish"], false);
    }

    #[test]
    fn garbage_token_is_rejected() {
        let err = GrantVerifier::new(creds())
            .verify(&SessionGrant::from_raw("not-a-jwt"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid grant"));
    }
}
