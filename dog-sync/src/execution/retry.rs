use std::time::Duration;

use rand::Rng;

/// Exponential backoff for items returned to `pending`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_backoff: Duration,
    /// Random spread, 0.0-1.0, applied symmetrically around the delay
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_backoff: Duration, jitter: f64) -> Self {
        Self {
            max_backoff,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay before attempt number `retry_count + 1`:
    /// `min(base * 2^(retry_count - 1), max_backoff)`, then jittered
    pub fn delay_for(&self, base: Duration, retry_count: u32) -> Duration {
        if base.is_zero() {
            return Duration::ZERO;
        }

        let exponent = retry_count.saturating_sub(1).min(30);
        let delay = base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        if self.jitter == 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        delay.mul_f64((1.0 + spread).max(0.0)).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_backoff: Duration::from_secs(3600),
            jitter: 0.0,
        }
    }
}
