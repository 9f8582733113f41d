use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::engine::ReplyEngine;
use relay_core::errors::RelayError;

/// Pre-programmed replies for deterministic testing.
pub enum MockReply {
    Text(String),
    Error(RelayError),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Engine that returns scripted replies in sequence. Once the script runs
/// out it echoes the prompt unchanged.
pub struct MockEngine {
    replies: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<String>>,
    call_count: AtomicUsize,
}

impl MockEngine {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ReplyEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &str) -> Result<String, RelayError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(prompt.to_string());

        let mut next = self.replies.lock().pop_front();
        loop {
            match next {
                None => return Ok(prompt.to_string()),
                Some(MockReply::Text(text)) => return Ok(text),
                Some(MockReply::Error(err)) => return Err(err),
                Some(MockReply::Delay(delay, inner)) => {
                    tokio::time::sleep(delay).await;
                    next = Some(*inner);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_in_sequence_then_echoes() {
        let engine = MockEngine::new(vec![MockReply::text("one"), MockReply::text("two")]);
        assert_eq!(engine.generate("a").await.unwrap(), "one");
        assert_eq!(engine.generate("b").await.unwrap(), "two");
        assert_eq!(engine.generate("c").await.unwrap(), "c");
        assert_eq!(engine.call_count(), 3);
        assert_eq!(engine.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn scripted_error() {
        let engine = MockEngine::new(vec![MockReply::Error(RelayError::Engine("boom".into()))]);
        let err = engine.generate("x").await.unwrap_err();
        assert_eq!(err, RelayError::Engine("boom".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_reply_waits() {
        let engine = MockEngine::new(vec![MockReply::delayed(
            Duration::from_secs(5),
            MockReply::text("late"),
        )]);
        let start = tokio::time::Instant::now();
        assert_eq!(engine.generate("x").await.unwrap(), "late");
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
