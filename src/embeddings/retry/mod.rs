#[cfg(test)]
mod tests;

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::EmbedError;

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Bounded-attempt retry with exponential backoff and jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of each delay randomised in either direction
    pub jitter: f64,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    #[inline]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Backoff before the attempt following `attempt` (1-based), without jitter
    #[inline]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Backoff with jitter applied
    #[inline]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    #[inline]
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, EmbedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EmbedError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("{} attempt {}/{}", operation, attempt, attempts);

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed on attempt {}/{}: {}; retrying in {:?}",
                        operation, attempt, attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        error!("{} failed after {} attempts: {}", operation, attempts, err);
                    } else {
                        warn!("{} failed with non-retryable error: {}", operation, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}
