//! Reconnect policies for the trade stream

use std::time::Duration;

/// Decides how long to wait before the next connection attempt.
///
/// The stream never gives up; a policy only shapes the delay.
pub trait ReconnectPolicy: Send {
    /// Delay before attempt number `attempt` (1-based, consecutive failures)
    fn next_delay(&mut self, attempt: u32) -> Duration;

    /// Called after a connection has been established
    fn reset(&mut self) {}
}

/// Flat delay between attempts: no backoff, no jitter, no attempt cap
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::from_millis(1000)
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&mut self, _attempt: u32) -> Duration {
        self.delay
    }
}
