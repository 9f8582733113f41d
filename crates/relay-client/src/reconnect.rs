use std::time::Duration;

use tokio::time::Instant;

use relay_core::settings::ReconnectSettings;

/// Exponential backoff with a cap and an attempt ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            base: Duration::from_millis(settings.base_delay_ms),
            cap: Duration::from_millis(settings.max_delay_ms),
            max_attempts: settings.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempt, cap)`. Attempts are numbered from 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Attempt counter for one client channel.
#[derive(Clone, Debug)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
    deadline: Option<Instant>,
    gave_up: bool,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            deadline: None,
            gave_up: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the pending reconnect is due, if one is scheduled.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    pub fn on_open(&mut self) {
        self.attempts = 0;
        self.deadline = None;
    }

    /// Record a close the client did not ask for (or a failed open).
    pub fn on_unexpected_close(&mut self, now: Instant) -> ReconnectDecision {
        if self.gave_up || self.attempts >= self.policy.max_attempts {
            self.gave_up = true;
            self.deadline = None;
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        self.deadline = Some(now + delay);
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Drop any pending reconnect without touching the counter.
    pub fn cancel_pending(&mut self) {
        self.deadline = None;
    }

    /// Manual reinitialization: forget attempts and the give-up flag.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.deadline = None;
        self.gave_up = false;
    }
}
