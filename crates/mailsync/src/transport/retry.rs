//! Retry and backoff policy

use rand::Rng;
use std::time::Duration;

/// Bounds and delays for retrying calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call while the API is throttling
    pub max_attempts: u32,
    /// First throttle backoff; doubles on every retry
    pub base_delay: Duration,
    /// Cap for the throttle backoff
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each throttle backoff
    pub jitter: Duration,
    /// Attempts per call for network failures, malformed bodies and 5xx
    pub transport_attempts: u32,
    /// Fixed delay between transport retries
    pub transport_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
            transport_attempts: 3,
            transport_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Policy with no delays, for tests
    pub fn immediate(max_attempts: u32, transport_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            transport_attempts,
            transport_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `retry` (1-based) of a throttled call
    pub fn throttle_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        delay + self.jitter_delay()
    }

    fn jitter_delay(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
