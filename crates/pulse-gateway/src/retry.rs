//! Retry with per-attempt timeout and exponential backoff.
//!
//! Each call is an explicit state machine:
//!
//! ```text
//! Pending -> Running -> Succeeded
//!               |
//!               +--> Retrying -> Running ...
//!               |
//!               +--> Failed (retries exhausted or non-retryable error)
//! ```

use std::future::Future;
use std::time::Duration;

use pulse_telemetry::Metrics;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(8000);
/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Retry parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: DEFAULT_TIMEOUT,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(4000),
        }
    }
}

impl RetryPolicy {
    /// Single attempt with the given timeout.
    pub fn no_retry(attempt_timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            attempt_timeout,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Delay after failed attempt `attempt` (0-based): `min(base * 2^attempt, cap)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

/// Lifecycle of one retried call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Owns the attempt counter and state for one call.
#[derive(Debug)]
pub struct RetryTask {
    policy: RetryPolicy,
    state: TaskState,
    attempts: u32,
}

impl RetryTask {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: TaskState::Pending,
            attempts: 0,
        }
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Enter `Running` and return the 0-based attempt index.
    pub fn begin_attempt(&mut self) -> u32 {
        let attempt = self.attempts;
        self.attempts += 1;
        self.state = TaskState::Running { attempt };
        attempt
    }

    pub fn succeed(&mut self) {
        self.state = TaskState::Succeeded {
            attempts: self.attempts,
        };
    }

    /// Record a failed attempt. Returns the backoff delay when another attempt is allowed.
    pub fn fail(&mut self, error: &GatewayError) -> Option<Duration> {
        let attempt = self.attempts.saturating_sub(1);
        if error.is_retryable() && attempt < self.policy.max_retries {
            let delay = self.policy.backoff(attempt);
            self.state = TaskState::Retrying { attempt, delay };
            Some(delay)
        } else {
            self.state = TaskState::Failed {
                attempts: self.attempts,
            };
            None
        }
    }
}

/// Run `attempt_fn` until it succeeds or the policy is exhausted.
///
/// Each attempt is bounded by `policy.attempt_timeout`; the attempt future is dropped on
/// timeout, which aborts the underlying request. `label` identifies the call in logs and
/// timeout errors (usually the URL).
pub async fn run_with_retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut attempt_fn: F,
) -> GatewayResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut task = RetryTask::new(*policy);

    loop {
        let attempt = task.begin_attempt();
        let outcome = match tokio::time::timeout(policy.attempt_timeout, attempt_fn(attempt)).await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                url: label.to_string(),
                after_ms: policy.attempt_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(value) => {
                task.succeed();
                debug!(label, attempts = task.attempts(), "Request succeeded");
                Metrics::gateway_request("ok");
                return Ok(value);
            }
            Err(error) => match task.fail(&error) {
                Some(delay) => {
                    warn!(
                        label,
                        attempt = attempt + 1,
                        max_attempts = policy.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Request failed, retrying"
                    );
                    Metrics::gateway_retry();
                    tokio::time::sleep(delay).await;
                }
                None => {
                    Metrics::gateway_request(error.outcome_label());
                    return Err(error);
                }
            },
        }
    }
}
