use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use relay_core::engine::ReplyEngine;
use relay_core::errors::RelayError;

/// Configuration for the ReliableEngine retry behavior.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter_factor: 0.2,
        }
    }
}

/// Wraps a ReplyEngine with retries.
///
/// - Only `RelayError::Engine` failures are retried
/// - Exponential backoff with jitter between attempts
/// - The last error is returned once retries are exhausted
pub struct ReliableEngine<E: ReplyEngine> {
    inner: E,
    config: ReliableConfig,
    total_retries: AtomicU64,
}

impl<E: ReplyEngine> ReliableEngine<E> {
    pub fn new(inner: E, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: E) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Delay before retry `attempt` (zero-based): base * 2^attempt, capped,
    /// then spread by ± jitter_factor.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let exp_ms = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_ms.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

#[async_trait]
impl<E: ReplyEngine> ReplyEngine for ReliableEngine<E> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, prompt: &str) -> Result<String, RelayError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate(prompt).await {
                Ok(reply) => return Ok(reply),
                Err(err @ RelayError::Engine(_)) if attempt < self.config.max_retries => {
                    let delay = self.retry_delay(attempt);
                    warn!(
                        engine = self.inner.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "reply generation failed, retrying"
                    );
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
