//! Reconnect backoff policy.

use std::time::Duration;

/// Exponential backoff for broker reconnects, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Growth factor per further failure.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `failures` consecutive failures
    /// (1-indexed): `base_delay * multiplier^(failures - 1)`, capped.
    ///
    /// Example with base=500ms, multiplier=2.0, max=30s:
    /// - 1 failure: 500ms
    /// - 2 failures: 1s
    /// - 3 failures: 2s
    /// - 8 failures: 30s (capped)
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}
