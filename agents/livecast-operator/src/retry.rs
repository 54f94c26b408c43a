//! Bounded exponential backoff for transport operations.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Room handshake: 3 attempts, 1s doubling, capped at 5s.
    pub const CONNECT: Self = Self {
        max_retries: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(5),
        backoff_factor: 2.0,
    };

    /// Track publication: 2 attempts, 500ms doubling, capped at 2s.
    pub const PUBLISH: Self = Self {
        max_retries: 2,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(2),
        backoff_factor: 2.0,
    };

    /// Status PUTs: at most two retries after the first attempt.
    pub const REPORT: Self = Self {
        max_retries: 3,
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(1),
        backoff_factor: 2.0,
    };

    /// Wait after failed attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Every wait a fully failing run goes through.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries.saturating_sub(1)).map(|attempt| self.delay_for(attempt))
    }
}

/// Errors the executor knows how to classify.
pub trait Retryable: Display {
    /// Retrying cannot help (bad token, rejected request).
    fn is_permanent(&self) -> bool;

    /// Value returned when the run is cancelled.
    fn cancelled() -> Self;
}

pub struct RetryExecutor {
    operation: &'static str,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(operation: &'static str, policy: RetryPolicy) -> Self {
        Self { operation, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, fails permanently or the attempt budget
    /// is spent; the last error is returned. `op` gets the 0-indexed
    /// attempt number. Cancellation aborts the attempt or wait in flight.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                result = op(attempt) => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if error.is_permanent() {
                tracing::debug!(operation = self.operation, attempt = attempt + 1, %error, "Permanent failure, not retrying");
                return Err(error);
            }
            if attempt + 1 >= attempts {
                tracing::warn!(operation = self.operation, attempts, %error, "Retries exhausted");
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                operation = self.operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Attempt failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
