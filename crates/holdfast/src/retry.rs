//! Retry executor.
//!
//! Runs a fallible async operation under a [`RetryPolicy`] and reports the
//! result as a [`RetryOutcome`] value instead of an error.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use holdfast_core::retry::RetryPolicy;
use holdfast_core::storage::{RepositoryError, Result};

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub value: Option<T>,
    pub last_error: Option<RepositoryError>,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    fn succeeded(value: T, attempts: u32) -> Self {
        Self {
            success: true,
            value: Some(value),
            last_error: None,
            attempts,
        }
    }

    fn failed(last_error: Option<RepositoryError>, attempts: u32) -> Self {
        Self {
            success: false,
            value: None,
            last_error,
            attempts,
        }
    }

    /// Converts the outcome back into a `Result`.
    pub fn into_result(self) -> Result<T> {
        match self.value {
            Some(value) => Ok(value),
            None => Err(self.last_error.unwrap_or_else(|| {
                RepositoryError::ConnectionFailed("operation interrupted".to_string())
            })),
        }
    }
}

/// Executes operations with bounded retries and jittered exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    interrupt: Option<watch::Receiver<bool>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: policy.normalized(),
            interrupt: None,
        }
    }

    /// Aborts backoff sleeps once the channel carries `true`.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `action` until it succeeds, attempts run out, or a sleep is interrupted.
    ///
    /// A disabled policy still performs the first attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut action: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match action().await {
                Ok(value) => return RetryOutcome::succeeded(value, attempt),
                Err(err) => err,
            };

            if !self.policy.allows_retry_after(attempt) {
                return RetryOutcome::failed(Some(err), attempt);
            }

            let delay = self.policy.next_delay(attempt);
            tracing::warn!(
                operation,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying operation"
            );

            if !self.sleep(delay).await {
                tracing::warn!(operation, attempt, "Retry interrupted during backoff");
                return RetryOutcome::failed(Some(err), attempt);
            }
        }
    }

    /// Sleeps for `delay`; returns false if interrupted.
    async fn sleep(&self, delay: Duration) -> bool {
        let Some(interrupt) = &self.interrupt else {
            tokio::time::sleep(delay).await;
            return true;
        };

        let mut interrupt = interrupt.clone();
        if *interrupt.borrow_and_update() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            changed = interrupt.changed() => match changed {
                Ok(()) if *interrupt.borrow() => false,
                _ => {
                    tokio::time::sleep(delay).await;
                    true
                }
            },
        }
    }
}
