//! Bounded retry policy for transfer attempts.
//!
//! Kept as an explicit value passed into the worker so tests can run the
//! full retry path with a zero delay instead of real sleeps.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total number of attempts, first one included.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether another attempt follows the given (1-based) failed one.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(10),
        }
    }
}
