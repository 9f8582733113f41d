use async_trait::async_trait;
use tracing::info;

use relay_core::engine::ReplyEngine;
use relay_core::errors::RelayError;

/// Replies with the prompt behind a fixed prefix.
pub struct EchoEngine {
    prefix: String,
}

impl EchoEngine {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new("Echo: ")
    }
}

#[async_trait]
impl ReplyEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String, RelayError> {
        info!(prompt_len = prompt.len(), "generating reply");
        Ok(format!("{}{}", self.prefix, prompt))
    }
}
