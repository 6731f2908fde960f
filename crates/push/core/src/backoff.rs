//! Retry policy with exponential backoff.

use std::time::Duration;

use rand::Rng as _;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Add random jitter of up to half the exponential step.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based).
    ///
    /// Below `max_delay` the sequence is strictly increasing even with jitter,
    /// since jitter stays under half of the step and the step doubles.
    pub fn delay(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let step_ms = base_ms.saturating_mul(2u64.saturating_pow(retry));

        let jitter_ms = match step_ms / 2 {
            half if self.jitter && half > 0 => rand::rng().random_range(0..half),
            _ => 0,
        };

        Duration::from_millis(step_ms.saturating_add(jitter_ms)).min(self.max_delay)
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn allows(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}
