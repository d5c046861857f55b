//! Exponential backoff between dispatch cycles that saw retryable failures.

use rand::Rng;
use std::time::Duration;

/// Backoff state owned by the dispatch loop.
#[derive(Debug, Clone)]
pub struct RetryDelay {
    base_ms: f64,
    factor: f64,
    retry_count_cap: u32,
    jitter: f64,
    retry_count: u32,
}

impl Default for RetryDelay {
    fn default() -> Self {
        Self::new(100.0, 2.0, 10, 0.1)
    }
}

impl RetryDelay {
    pub fn new(base_ms: f64, factor: f64, retry_count_cap: u32, jitter: f64) -> Self {
        Self {
            base_ms,
            factor,
            retry_count_cap,
            jitter,
            retry_count: 0,
        }
    }

    /// Record a cycle with at least one retryable failure
    pub fn will_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Record a cycle without retryable failures
    pub fn wont_retry(&mut self) {
        self.retry_count = 0;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Current delay; does not change the state
    pub fn get(&self) -> Duration {
        if self.retry_count == 0 {
            return Duration::ZERO;
        }

        let exponent = self.retry_count.min(self.retry_count_cap).saturating_sub(1);
        let mut delay_ms = self.base_ms * self.factor.powi(exponent as i32);

        if self.jitter != 0.0 {
            let seed: f64 = rand::thread_rng().gen_range(0.0..1.0);
            let deviation = (seed * self.jitter * delay_ms).floor();
            if seed.round() == 1.0 {
                delay_ms -= deviation;
            } else {
                delay_ms += deviation;
            }
        }

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}
