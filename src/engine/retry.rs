//! Fixed-ladder retry policy.

use std::time::Duration;

/// Per-fragment retry ladder.
///
/// `max_retries` counts retries after the first attempt. The delay before
/// retry `n` (1-based) is `delays[n - 1]`, or the last configured delay once
/// `n` runs past the ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_millis(3, &[1000, 2000, 3000])
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_retries,
            delays,
        }
    }

    pub fn from_millis(max_retries: u32, delays_ms: &[u64]) -> Self {
        Self::new(
            max_retries,
            delays_ms.iter().copied().map(Duration::from_millis).collect(),
        )
    }

    /// Whether another retry is allowed after `retries_so_far` retries.
    pub fn should_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = attempt.saturating_sub(1) as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}
