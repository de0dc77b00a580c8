//! Retry execution with exponential backoff and circuit breaking.
//!
//! Wraps a fallible async operation with bounded retries. The circuit
//! breaker registry is consulted before any attempt, and every final
//! outcome is recorded against it.

use crate::breaker::CircuitBreakerRegistry;
use crate::errors::OrchestratorError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for a single operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (so `max_retries + 1` invocations).
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Returns the backoff delay before retrying after `attempt` (1-indexed).
    ///
    /// Doubles each time, capped at ten times the base delay.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = 2u32.saturating_pow(exponent).min(10);
        self.base_delay.saturating_mul(factor)
    }
}

/// Executes operations with retry, backoff, and breaker gating.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    breaker: Arc<CircuitBreakerRegistry>,
}

impl RetryExecutor {
    /// Creates an executor backed by the given breaker registry.
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreakerRegistry>) -> Self {
        Self { breaker }
    }

    /// Returns the breaker registry this executor consults.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breaker
    }

    /// Runs `body` with bounded retries under the given policy.
    ///
    /// Rejects immediately if the breaker for `operation` is open.
    /// Non-retriable failures propagate after the first attempt;
    /// retriable ones are retried with exponential backoff until
    /// `max_retries + 1` total invocations, then wrapped in
    /// [`OrchestratorError::RetriesExhausted`] with the last cause.
    ///
    /// # Errors
    ///
    /// Returns the body's error (possibly wrapped) or a circuit-open
    /// rejection.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut body: F,
    ) -> Result<T, OrchestratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        if self.breaker.is_open(operation) {
            warn!(operation, "Rejected by open circuit breaker");
            return Err(OrchestratorError::CircuitOpen {
                operation: operation.to_string(),
            });
        }

        let max_attempts = policy.max_retries.saturating_add(1);
        let mut attempt = 1u32;

        loop {
            match body().await {
                Ok(value) => {
                    self.breaker.record_success(operation);
                    return Ok(value);
                }
                Err(error) if !error.is_retriable() => {
                    self.breaker.record_failure(operation);
                    return Err(error);
                }
                Err(error) => {
                    if attempt >= max_attempts {
                        self.breaker.record_failure(operation);
                        return Err(OrchestratorError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: Box::new(error),
                        });
                    }

                    let delay = policy.backoff_delay(attempt);
                    debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
