// src/services/retry.rs

//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::models::RetryConfig;

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryReport<T, E> {
    pub result: Result<T, E>,
    /// Retries performed after the first attempt.
    pub retries: u32,
}

/// Retry policy: `max_attempts` tries, sleeping `base_delay * 2^(attempt-1)`
/// between retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

    /// Policy for navigation-level operations.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
        )
    }

    /// Policy for the detail extraction loop.
    pub fn extraction(config: &RetryConfig) -> Self {
        Self::new(
            config.extraction_attempts,
            Duration::from_millis(config.extraction_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Start tracking attempts of `operation` for a hand-written retry loop.
    ///
    /// Used where the retried call borrows a page mutably and cannot be
    /// expressed as a closure.
    pub fn attempts<'a>(&self, operation: &'a str) -> Attempts<'a> {
        Attempts {
            policy: *self,
            operation,
            attempt: 1,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted.
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        operation: &str,
        is_retryable: P,
        mut op: F,
    ) -> RetryReport<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempts = self.attempts(operation);
        loop {
            match op(attempts.current()).await {
                Ok(value) => {
                    return RetryReport {
                        result: Ok(value),
                        retries: attempts.retries(),
                    };
                }
                Err(error) => {
                    let retryable = is_retryable(&error);
                    if let Err(error) = attempts.backoff(error, retryable).await {
                        return RetryReport {
                            result: Err(error),
                            retries: attempts.retries(),
                        };
                    }
                }
            }
        }
    }

    /// [`execute`](Self::execute) without the report.
    pub async fn run<T, E, F, Fut, P>(&self, operation: &str, is_retryable: P, op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.execute(operation, is_retryable, op).await.result
    }
}

/// Attempt counter of one retried operation.
#[derive(Debug)]
pub struct Attempts<'a> {
    policy: RetryPolicy,
    operation: &'a str,
    attempt: u32,
}

impl Attempts<'_> {
    /// The attempt about to run (1-based).
    pub fn current(&self) -> u32 {
        self.attempt
    }

    pub fn retries(&self) -> u32 {
        self.attempt - 1
    }

    /// Account for a failed attempt.
    ///
    /// Sleeps the backoff and returns `Ok(())` when another attempt is
    /// allowed; hands the error back when it is not retryable or the
    /// attempts are exhausted.
    pub async fn backoff<E: Display>(&mut self, error: E, retryable: bool) -> Result<(), E> {
        if !retryable || self.attempt >= self.policy.max_attempts {
            return Err(error);
        }
        let delay = self.policy.delay_for(self.attempt);
        warn!(
            operation = self.operation,
            attempt = self.attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retry scheduled"
        );
        tokio::time::sleep(delay).await;
        self.attempt += 1;
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
