//! Rolling request-rate history and the 403 classifier
//!
//! The hosted mail API answers both throttling and bad credentials with
//! 403. Whether a 403 is throttling is decided from what this run has seen
//! so far: prior successes, a sustained request rate, or an ongoing
//! throttle sequence all point to throttling; a 403 on a cold start does not.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Body the API sends when a request limit was exceeded
pub const THROTTLE_HINT: &str = "Exceeded request limits";

/// Request ceilings enforced by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Length of the rolling window
    pub window: Duration,
    /// Reads allowed per window
    pub read_limit: usize,
    /// Writes allowed per window
    pub write_limit: usize,
    /// Calls per window above which a 403 is taken as throttling
    pub burst_threshold: usize,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            read_limit: 120,
            write_limit: 90,
            burst_threshold: 10,
        }
    }
}

/// How a 403 response is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenClass {
    Throttled,
    Unauthorized,
}

/// Timestamps of recent calls plus what the run has learned about the account
#[derive(Debug)]
pub struct CallHistory {
    limits: RateLimits,
    reads: VecDeque<Instant>,
    writes: VecDeque<Instant>,
    successes: u64,
    throttling: bool,
}

impl CallHistory {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            reads: VecDeque::new(),
            writes: VecDeque::new(),
            successes: 0,
            throttling: false,
        }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    fn prune(&mut self, now: Instant) {
        let window = self.limits.window;
        for queue in [&mut self.reads, &mut self.writes] {
            while let Some(&oldest) = queue.front() {
                if now.saturating_duration_since(oldest) >= window {
                    queue.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// How long to wait before issuing another call of this kind, if at all
    pub fn delay_before(&mut self, write: bool, now: Instant) -> Option<Duration> {
        self.prune(now);
        let (queue, limit) = if write {
            (&self.writes, self.limits.write_limit)
        } else {
            (&self.reads, self.limits.read_limit)
        };

        if limit == 0 || queue.len() < limit {
            return None;
        }
        let oldest = *queue.front()?;
        let wait = (oldest + self.limits.window).saturating_duration_since(now);
        (!wait.is_zero()).then_some(wait)
    }

    pub fn record_call(&mut self, write: bool, now: Instant) {
        if write {
            self.writes.push_back(now);
        } else {
            self.reads.push_back(now);
        }
    }

    /// A response proved the credentials work; ends any throttle sequence
    pub fn record_success(&mut self) {
        self.successes += 1;
        self.throttling = false;
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    /// Calls issued within the current window
    pub fn recent_calls(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.reads.len() + self.writes.len()
    }

    /// Decide whether a 403 is throttling or a genuine authorization failure
    pub fn classify_forbidden(&mut self, body: &str, now: Instant) -> ForbiddenClass {
        let throttled = body.contains(THROTTLE_HINT)
            || self.throttling
            || self.successes > 0
            || self.recent_calls(now) >= self.limits.burst_threshold;

        if throttled {
            self.throttling = true;
            ForbiddenClass::Throttled
        } else {
            ForbiddenClass::Unauthorized
        }
    }
}
