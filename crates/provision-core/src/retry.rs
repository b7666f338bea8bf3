//! Bounded retry for calls to external collaborators.
//!
//! Only [`ClientError`]s flagged `transient` are retried. Everything the
//! retry loop wraps must be idempotent (create-if-not-exists, apply).

use crate::error::ClientError;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retry.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(500), Duration::from_secs(8))
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: initial,
            max_backoff: max,
            multiplier: 2,
        }
    }

    /// Retries without sleeping; used by tests and the dry-run wiring.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::exponential(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, given that `attempt` (1-indexed) failed.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// The closure receives the 1-indexed attempt number.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut(u32) -> Result<T, ClientError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.transient && attempt < self.max_attempts => {
                    let delay = self.backoff_after(attempt);
                    warn!(
                        "{label}: attempt {attempt}/{} failed ({e}); retrying in {}ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
