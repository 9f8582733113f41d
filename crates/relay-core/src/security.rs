use secrecy::{ExposeSecret, SecretString};

use crate::errors::RelayError;

/// Key pair used to sign session grants. The secret is zeroized on drop and
/// redacted in Debug.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: SecretString,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
        }
    }

    /// Build credentials from optional settings values. Missing or blank
    /// values are a configuration error.
    pub fn from_parts(api_key: Option<&str>, api_secret: Option<&str>) -> Result<Self, RelayError> {
        match (non_blank(api_key), non_blank(api_secret)) {
            (Some(key), Some(secret)) => Ok(Self::new(key, secret)),
            (None, _) => Err(RelayError::Config("api key is not set".into())),
            (_, None) => Err(RelayError::Config("api secret is not set".into())),
        }
    }

    pub fn secret_bytes(&self) -> &[u8] {
        self.api_secret.expose_secret().as_bytes()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
