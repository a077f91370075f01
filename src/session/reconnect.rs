//! Reconnection policy: bounded attempts with exponential backoff
//!
//! The backoff state is explicit and owned by the caller (the session
//! supervisor), never a shared global. A successful reconnect resets it
//! to the policy's initial values.

use std::time::Duration;

/// Configuration for automatic reconnection
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum failed attempts before giving up for good
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per failure afterwards
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Mutable backoff progress for one outage.
///
/// The delay doubles on every failed attempt with no ceiling. Unbounded
/// growth is intentional and documented; capping it is a policy decision
/// left to operators via `max_attempts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    /// Failed attempts so far in this outage
    pub attempt: u32,
    /// Delay to wait before the next attempt
    pub current_delay: Duration,
}

impl BackoffState {
    /// Fresh state at the policy's initial values
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            attempt: 0,
            current_delay: policy.base_delay,
        }
    }

    /// Record a failed attempt: returns the delay to sleep before the
    /// next try, then doubles it for the one after.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current_delay;
        self.attempt += 1;
        self.current_delay = self.current_delay.saturating_mul(2);
        delay
    }

    /// Reset to initial values after a successful Ready transition
    pub fn reset(&mut self, policy: &ReconnectPolicy) {
        *self = Self::new(policy);
    }

    /// True once the attempt budget is spent; no further attempts occur
    pub fn exhausted(&self, policy: &ReconnectPolicy) -> bool {
        self.attempt >= policy.max_attempts
    }
}
