use async_trait::async_trait;

use crate::errors::RelayError;

/// Produces a reply for one inbound text message.
///
/// Implementations may keep state between calls but must be safe to call
/// concurrently: the session bridge runs one generation per inbound event
/// without ordering them.
#[async_trait]
pub trait ReplyEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, RelayError>;
}
