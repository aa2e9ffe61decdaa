//! Retry Logic
//!
//! Bounded retry with exponential backoff for transient backend failures.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tiered_prompt_orchestrator::enhanced::{RetryExecutor, RetryPolicy};
//! use tiered_prompt_orchestrator::history::OutcomeCounters;
//! use tiered_prompt_orchestrator::{EventBus, OrchestratorError};
//! # #[tokio::main]
//! # async fn main() -> Result<(), OrchestratorError> {
//! let executor = RetryExecutor::new(
//!     RetryPolicy::default(),
//!     Arc::new(OutcomeCounters::new()),
//!     EventBus::new(),
//! );
//!
//! let outcome = executor
//!     .run(|| async { Ok::<_, OrchestratorError>("answer") })
//!     .await?;
//! assert_eq!(outcome.retry_count, 0);
//! # Ok(())
//! # }
//! ```
//!
//! Attempt `n` (zero-based) that fails is followed by a sleep of
//! `base_delay * 2^n`, so the default policy waits 1s, 2s, 4s. The success and
//! error counters move exactly once per [`RetryExecutor::run`], reflecting the
//! final outcome only.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::events::{EventBus, EventKind};
use crate::history::OutcomeCounters;
use crate::OrchestratorError;

/// Retry policy configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Create policy with exponential backoff
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff after the zero-based `attempt` has failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Successful result of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    /// The value produced by the successful attempt.
    pub value: T,
    /// Number of failed attempts before it.
    pub retry_count: u32,
}

/// Runs fallible async operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    counters: Arc<OutcomeCounters>,
    events: EventBus,
}

impl RetryExecutor {
    /// Create an executor that reports outcomes to `counters` and retry
    /// attempts to `events`.
    pub fn new(policy: RetryPolicy, counters: Arc<OutcomeCounters>, events: EventBus) -> Self {
        Self {
            policy,
            counters,
            events,
        }
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `op` with the policy's attempt bound.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::RetryExhausted`] when every attempt failed, or
    /// as soon as an attempt fails with an error that is not
    /// [retryable](OrchestratorError::is_retryable). In that case no backoff
    /// is taken and `attempts` counts the attempts actually made.
    pub async fn run<F, Fut, T>(&self, op: F) -> Result<RetryOutcome<T>, OrchestratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        self.run_with_attempts(self.policy.max_attempts, op).await
    }

    /// Execute `op` with an explicit attempt bound.
    ///
    /// A bound of zero is treated as one attempt.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub async fn run_with_attempts<F, Fut, T>(
        &self,
        max_attempts: u32,
        mut op: F,
    ) -> Result<RetryOutcome<T>, OrchestratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            debug!(attempt = attempt, max = max_attempts, "retry: attempting operation");

            let error = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "retry: operation succeeded after retries");
                    }
                    self.counters.record_success();
                    return Ok(RetryOutcome {
                        value,
                        retry_count: attempt,
                    });
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(error = %error, "retry: error is not retryable");
                self.counters.record_error();
                return Err(OrchestratorError::RetryExhausted {
                    attempts: attempt + 1,
                    last_error: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt = attempt,
                max = max_attempts,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "retry: operation failed"
            );
            self.events.emit(
                EventKind::RetryAttempt,
                json!({
                    "attempt": attempt,
                    "maxAttempts": max_attempts,
                    "error": error.to_string(),
                    "delayMs": delay.as_millis() as u64,
                }),
            );
            tokio::time::sleep(delay).await;

            attempt += 1;
            if attempt >= max_attempts {
                warn!(attempts = attempt, "retry: all attempts exhausted");
                self.counters.record_error();
                return Err(OrchestratorError::RetryExhausted {
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }
        }
    }
}
