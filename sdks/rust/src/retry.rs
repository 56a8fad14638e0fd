//! Back-off for conversations that are busy in another session.
//!
//! The server never queues a send for a conversation another session is
//! driving; it answers 409. Clients wait and try again on this schedule.

use std::time::Duration;

/// Exponential back-off applied to 409 responses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Retries after the first request. Zero disables retrying.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    /// 2 s, 3 s, 4.5 s.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            multiplier: 1.5,
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (zero-based), or `None` once retries are exhausted.
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        let factor = self.multiplier.powi(i32::try_from(retry).unwrap_or(i32::MAX));
        Some(self.initial_delay.mul_f64(factor))
    }

    /// The full delay schedule.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).filter_map(|retry| self.delay(retry))
    }
}
