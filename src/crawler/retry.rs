//! Retry with exponential backoff for API requests
//!
//! Every attempt acquires its own permit from the shared [`RateLimiter`], so
//! retries never bypass the request budget.

use crate::api::{ApiError, SearchPage};
use crate::config::RetryConfig;
use crate::crawler::rate_limiter::{RateLimitError, RateLimiter};
use crate::model::RateBudget;
use crate::SweepError;
use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{Duration, Instant};

/// Outcome class of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Worth another attempt, no sooner than `min_wait` when given
    Retryable { min_wait: Option<Duration> },
    NonRetryable,
}

/// What the retry loop does after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Finished,
    RetryAt(Instant),
    GiveUp,
}

/// Terminal failure of a retried request
#[derive(Debug, Error)]
pub enum RetryFailure {
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ApiError },

    #[error("Request rejected: {0}")]
    Rejected(ApiError),

    #[error("Deadline passed after {attempts} attempts")]
    Deadline {
        attempts: u32,
        last: Option<ApiError>,
    },

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

impl RetryFailure {
    /// Returns true when the whole run must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected(e) if e.is_authentication())
    }
}

impl From<RetryFailure> for SweepError {
    fn from(failure: RetryFailure) -> Self {
        match failure {
            RetryFailure::Rejected(ApiError::Authentication(msg)) => SweepError::Authentication(msg),
            RetryFailure::Rejected(e) | RetryFailure::Exhausted { last: e, .. } => SweepError::Api(e),
            RetryFailure::RateLimit(e) => SweepError::RateLimit(e),
            RetryFailure::Deadline { attempts, .. } => {
                SweepError::Task(format!("deadline passed after {} attempts", attempts))
            }
        }
    }
}

/// Backoff parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Exponential delay before retry number `retry` (0-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jitter(&self, retry: u32) -> Duration {
        let bound = self.jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        let sample = RandomState::new().hash_one((retry, std::time::SystemTime::now()));
        Duration::from_millis(sample % (bound + 1))
    }
}

/// Per-request retry state machine
#[derive(Debug, Clone, Default)]
pub struct AttemptState {
    pub attempt_count: u32,
    pub next_allowed_at: Option<Instant>,
    pub classification: Option<Classification>,
}

impl AttemptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the result of an attempt and decides what happens next
    pub fn observe(
        &mut self,
        classification: Classification,
        policy: &RetryPolicy,
        now: Instant,
    ) -> Step {
        self.attempt_count += 1;
        self.classification = Some(classification);

        match classification {
            Classification::Success => Step::Finished,
            Classification::NonRetryable => Step::GiveUp,
            Classification::Retryable { .. } if self.attempt_count >= policy.max_attempts => {
                Step::GiveUp
            }
            Classification::Retryable { min_wait } => {
                let retry = self.attempt_count - 1;
                let delay = (policy.backoff(retry) + policy.jitter(retry))
                    .max(min_wait.unwrap_or(Duration::ZERO));
                let at = now + delay;
                self.next_allowed_at = Some(at);
                Step::RetryAt(at)
            }
        }
    }
}

/// Results that carry rate-limit telemetry
pub trait RateTelemetry {
    fn rate_budget(&self) -> Option<RateBudget>;
}

impl RateTelemetry for SearchPage {
    fn rate_budget(&self) -> Option<RateBudget> {
        self.rate
    }
}

impl RateTelemetry for RateBudget {
    fn rate_budget(&self) -> Option<RateBudget> {
        Some(*self)
    }
}

/// Runs API calls under the rate limiter with bounded retries
#[derive(Debug, Clone)]
pub struct BackoffRetrier {
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
}

impl BackoffRetrier {
    pub fn new(policy: RetryPolicy, limiter: Arc<RateLimiter>) -> Self {
        Self { policy, limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Calls `op` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// # Arguments
    ///
    /// * `label` - Name used in log lines
    /// * `deadline` - No attempt starts after this instant
    /// * `op` - Produces one attempt
    pub async fn call<T, F, Fut>(
        &self,
        label: &str,
        deadline: Option<Instant>,
        mut op: F,
    ) -> Result<T, RetryFailure>
    where
        T: RateTelemetry,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut state = AttemptState::new();
        let mut last_error: Option<ApiError> = None;

        loop {
            let permit = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.limiter.acquire())
                    .await
                    .map_err(|_| RetryFailure::Deadline {
                        attempts: state.attempt_count,
                        last: last_error.clone(),
                    })??,
                None => self.limiter.acquire().await?,
            };

            let result = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, op()).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(RetryFailure::Deadline {
                            attempts: state.attempt_count + 1,
                            last: last_error,
                        })
                    }
                },
                None => op().await,
            };

            let error = match result {
                Ok(value) => {
                    permit.settle(value.rate_budget());
                    state.observe(Classification::Success, &self.policy, Instant::now());
                    return Ok(value);
                }
                Err(error) => error,
            };

            // The limiter owns the wait for the primary budget
            let classification = match &error {
                ApiError::RateLimited {
                    reset_at: Some(reset_at),
                } => {
                    permit.settle(Some(RateBudget {
                        remaining: 0,
                        reset_at: *reset_at,
                    }));
                    Classification::Retryable { min_wait: None }
                }
                _ => {
                    permit.settle(None);
                    error.classify()
                }
            };

            match state.observe(classification, &self.policy, Instant::now()) {
                _ if classification == Classification::NonRetryable => {
                    tracing::error!("{}: request rejected: {}", label, error);
                    return Err(RetryFailure::Rejected(error));
                }
                Step::Finished | Step::GiveUp => {
                    tracing::error!(
                        "{}: failed permanently after {} attempts: {}",
                        label,
                        state.attempt_count,
                        error
                    );
                    return Err(RetryFailure::Exhausted {
                        attempts: state.attempt_count,
                        last: error,
                    });
                }
                Step::RetryAt(at) => {
                    if deadline.map_or(false, |deadline| at > deadline) {
                        return Err(RetryFailure::Deadline {
                            attempts: state.attempt_count,
                            last: Some(error),
                        });
                    }
                    tracing::debug!(
                        "{}: attempt {}/{} failed: {}, retrying in {:?}",
                        label,
                        state.attempt_count,
                        self.policy.max_attempts,
                        error,
                        at.saturating_duration_since(Instant::now())
                    );
                    last_error = Some(error);
                    tokio::time::sleep_until(at).await;
                }
            }
        }
    }
}
