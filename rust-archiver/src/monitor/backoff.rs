//! Consecutive-failure backoff for channel polling.
//!
//! - delay = base * 2^(failures - 1)
//! - capped at `max`
//! - a successful fetch resets the counter

use std::time::Duration;

/// Maximum exponent to prevent overflow.
const MAX_EXPONENT: u32 = 16;

/// Smallest delay after a failure.
const MIN_BASE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(MIN_BASE);
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    /// Count one more failure and return how long to wait before retrying.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay()
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay for the current failure count; zero when there are no failures.
    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }

        let exponent = (self.failures - 1).min(MAX_EXPONENT);
        let multiplier = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}
