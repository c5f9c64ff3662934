//! Reconnection backoff policy.

use std::time::Duration;

/// Bounded exponential backoff: the `n`-th consecutive reconnect waits
/// `min(max_backoff, 2^n)` seconds, and no attempt is made past
/// `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempt ceiling.
    pub max_attempts: u32,
    /// Upper bound on a single wait.
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            max_backoff,
        }
    }

    /// Delay before attempt number `attempt` (1-based), or `None` once the
    /// ceiling is exceeded.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let secs = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Some(Duration::from_secs(secs).min(self.max_backoff))
    }
}
