//! Bounded retry policy for session connection attempts

use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Decide whether attempt number `attempt` may still be retried
pub fn decide(attempt: u32, max_attempts: u32) -> RetryDecision {
    if attempt <= max_attempts {
        RetryDecision::Retry
    } else {
        RetryDecision::GiveUp
    }
}

/// Attempt budget plus exponential backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries immediately
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn decide(&self, attempt: u32) -> RetryDecision {
        decide(attempt, self.max_attempts)
    }

    /// Delay before retry number `attempt` (1-based), doubling each time
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Progress label shown while retrying, e.g. `attempt 2/5`
    pub fn progress(&self, attempt: u32) -> String {
        format!("attempt {}/{}", attempt, self.max_attempts)
    }
}
