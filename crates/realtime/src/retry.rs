use std::time::Duration;

/// Reconnection budget for a realtime channel: a fixed pause between
/// attempts and a cap after which the channel stays down until the next
/// explicit subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Delay before reconnection attempt number `attempt` (zero-based), or
    /// `None` once the budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), 5)
    }
}
