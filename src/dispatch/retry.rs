use std::time::Duration;

use rand::Rng;

use crate::mail::TransportError;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Decision after a failed send attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay.
    Retry(Duration),
    /// Record the delivery as FAILED.
    GiveUp,
}

/// Bounded exponential backoff for transient transport errors.
///
/// Attempt `n` (1-based) that failed transiently is followed by a sleep of
/// `base_delay * 2^(n-1)`, scaled by a random factor in `[0.9, 1.1]` and capped at
/// [`MAX_BACKOFF`]. Permanent errors are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn decide(&self, attempt: u32, error: &TransportError) -> RetryDecision {
        if !error.is_transient() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        RetryDecision::Retry(self.backoff(attempt))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1 << exponent)
            .min(MAX_BACKOFF);
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);

        delay.mul_f64(jitter).min(MAX_BACKOFF)
    }
}
