//! Retry policy shared by the HTTP boundary adapters.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap and proportional jitter.
///
/// Attempt numbers are 1-based: attempt 1 is the first try, so the delay
/// before attempt `n + 1` is `delay_for(n)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl BackoffPolicy {
    /// Builds a policy. `max_attempts` is clamped to at least 1 and
    /// `jitter` to `0.0..=1.0`.
    pub fn new(
        max_attempts: usize,
        base_delay: Duration,
        max_delay: Duration,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: if jitter.is_finite() {
                jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    /// Fixed delay between a bounded number of attempts.
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self::new(max_attempts, delay, delay, 0.0)
    }

    /// Single attempt, never sleeps.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn allows_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the next attempt, without jitter.
    pub fn base_delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next attempt, with jitter applied.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(1.0 + spread)
    }

    /// Sleeps for [`Self::delay_for`].
    pub async fn wait(&self, attempt: usize) {
        let delay = self.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(16), 0.2)
    }
}
