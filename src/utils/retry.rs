use crate::utils::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `multiplier * 2^(attempt - 1)`, clamped to `[min, max]`.
    Exponential {
        multiplier: Duration,
        min: Duration,
        max: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, multiplier: Duration, min: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { multiplier, min, max },
        }
    }

    /// Policy used for the qHAWAX REST calls.
    pub fn qhawax_default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }

    /// Policy used for Google Drive downloads.
    pub fn drive_default() -> Self {
        Self::exponential(
            5,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(10),
        )
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { multiplier, min, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                let raw = multiplier.saturating_mul(1u32 << exponent);
                raw.clamp(min, max.max(min))
            }
        }
    }

    /// Runs `op` until it succeeds, retrying every error.
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_if(operation, |_| true, op).await
    }

    /// Runs `op` until it succeeds, an error is not retryable, or attempts run out.
    /// The last error is returned on exhaustion.
    pub async fn run_if<T, F, Fut, P>(&self, operation: &str, retryable: P, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&AppError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        "{} attempt {} failed: {}. Retrying in {:?}",
                        operation,
                        attempt,
                        e,
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("{} attempt {} failed: {}", operation, attempt, e);
                    if attempt >= max_attempts {
                        tracing::warn!("{}: max retries reached", operation);
                    }
                    return Err(e);
                }
            }
        }
    }
}
