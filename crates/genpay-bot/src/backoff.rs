//! Poll scheduling: capped exponential backoff with jitter and an attempt limit

use std::time::Duration;

use rand::Rng;

use crate::config::PollPolicy;

/// Hands out the wait before each status poll
#[derive(Clone, Debug)]
pub struct PollSchedule {
    policy: PollPolicy,
    attempt: u32,
}

impl PollSchedule {
    pub const fn new(policy: PollPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Attempts handed out so far
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay before attempt `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let capped_attempt = attempt.min(16);
        let multiplier = 1_u32 << capped_attempt;
        self.policy
            .initial_delay
            .saturating_mul(multiplier)
            .min(self.policy.max_delay)
    }

    /// Delay before the next poll, or `None` once the attempt budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let base = self.base_delay(self.attempt);
        self.attempt += 1;
        Some(self.jittered(base))
    }

    fn jittered(&self, base: Duration) -> Duration {
        let spread_ms = base.mul_f64(self.policy.jitter.clamp(0.0, 1.0)).as_millis() as u64;
        if spread_ms == 0 {
            return base;
        }
        let offset = rand::rng().random_range(0..=spread_ms * 2);
        (base + Duration::from_millis(offset)).saturating_sub(Duration::from_millis(spread_ms))
    }
}
