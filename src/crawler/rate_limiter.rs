//! Process-wide request budget
//!
//! This module handles:
//! - Tracking the remaining request budget reported by the server
//! - Counting requests that are in flight against that budget
//! - Suspending callers until the budget resets
//! - Refusing waits longer than the configured maximum
//!
//! Server telemetry always overrides the local estimate.

use crate::config::RateLimitConfig;
use crate::model::RateBudget;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

/// How long a caller waits for telemetry before re-checking the gate
const RECHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Errors returned when a permit cannot be granted
#[derive(Debug, Clone, Error)]
pub enum RateLimitError {
    #[error("Rate limit resets in {wait:?}, longer than the allowed {max_wait:?}")]
    WaitExceeded { wait: Duration, max_wait: Duration },
}

/// Decision of the admission gate at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// A request may start now
    Proceed,
    /// The budget is spent; try again at the given instant
    WaitUntil(Instant),
    /// In-flight requests hold the rest of the budget; wait for their telemetry
    WaitForUpdate,
    /// The budget is spent and the reset is too far away
    Exceeded { wait: Duration },
}

#[derive(Debug, Default)]
struct BudgetState {
    /// `None` until the server reports, and again once the window has reset
    remaining: Option<u32>,
    reset_at: Option<Instant>,
    in_flight: u32,
}

impl BudgetState {
    /// Forgets a budget whose window has already reset
    fn expire(&mut self, now: Instant, margin: Duration) {
        if let Some(reset_at) = self.reset_at {
            if now >= reset_at + margin {
                self.remaining = None;
                self.reset_at = None;
            }
        }
    }

    fn gate(&self, now: Instant, margin: Duration, max_wait: Duration) -> Gate {
        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset_at)) => {
                let ready_at = reset_at + margin;
                if ready_at <= now {
                    return Gate::Proceed;
                }
                let wait = ready_at - now;
                if wait > max_wait {
                    Gate::Exceeded { wait }
                } else {
                    Gate::WaitUntil(ready_at)
                }
            }
            (Some(remaining), Some(_)) if remaining > self.in_flight => Gate::Proceed,
            (Some(_), Some(_)) => Gate::WaitForUpdate,
            // Unknown budget: allow a single request
            _ if self.in_flight == 0 => Gate::Proceed,
            _ => Gate::WaitForUpdate,
        }
    }
}

/// Shared admission control for every request a worker makes
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<BudgetState>,
    notify: Notify,
    safety_margin: Duration,
    max_wait: Duration,
}

impl RateLimiter {
    /// Creates a limiter with an unknown budget
    ///
    /// # Arguments
    ///
    /// * `safety_margin` - Extra wait past the advertised reset
    /// * `max_wait` - Longest suspension `acquire` accepts
    pub fn new(safety_margin: Duration, max_wait: Duration) -> Self {
        Self {
            state: Mutex::new(BudgetState::default()),
            notify: Notify::new(),
            safety_margin,
            max_wait,
        }
    }

    /// Creates a limiter from configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            Duration::from_millis(config.safety_margin_ms),
            Duration::from_secs(config.max_wait_secs),
        )
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evaluates the gate without reserving anything
    pub fn decide(&self, now: Instant) -> Gate {
        let mut state = self.lock();
        state.expire(now, self.safety_margin);
        state.gate(now, self.safety_margin, self.max_wait)
    }

    /// Waits until a request may be sent and reserves a slot for it
    ///
    /// # Returns
    ///
    /// * `Ok(RatePermit)` - The slot; settle it with the response telemetry
    /// * `Err(RateLimitError)` - The reset is further away than `max_wait`
    pub async fn acquire(&self) -> Result<RatePermit<'_>, RateLimitError> {
        loop {
            // Register interest before checking so an update between the
            // check and the wait is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let gate = {
                let mut state = self.lock();
                state.expire(now, self.safety_margin);
                let gate = state.gate(now, self.safety_margin, self.max_wait);
                if gate == Gate::Proceed {
                    state.in_flight += 1;
                }
                gate
            };

            match gate {
                Gate::Proceed => {
                    return Ok(RatePermit {
                        limiter: self,
                        settled: false,
                    })
                }
                Gate::WaitUntil(ready_at) => {
                    tracing::info!(
                        "Rate budget exhausted, waiting {:?} for reset",
                        ready_at.saturating_duration_since(now)
                    );
                    tokio::select! {
                        _ = tokio::time::sleep_until(ready_at) => {}
                        _ = &mut notified => {}
                    }
                }
                Gate::WaitForUpdate => {
                    let _ = tokio::time::timeout(RECHECK_INTERVAL, &mut notified).await;
                }
                Gate::Exceeded { wait } => {
                    tracing::warn!(
                        "Rate budget resets in {:?}, beyond the {:?} limit",
                        wait,
                        self.max_wait
                    );
                    return Err(RateLimitError::WaitExceeded {
                        wait,
                        max_wait: self.max_wait,
                    });
                }
            }
        }
    }

    /// Applies a budget reported by the server
    pub fn update(&self, remaining: u32, reset_at: DateTime<Utc>) {
        self.apply(remaining, to_instant(reset_at));
    }

    /// Applies a budget whose reset is already a monotonic instant
    pub(crate) fn apply(&self, remaining: u32, reset_at: Instant) {
        {
            let mut state = self.lock();
            state.remaining = Some(remaining);
            state.reset_at = Some(reset_at);
        }
        self.notify.notify_waiters();
    }

    /// Current budget estimate, `None` while unknown
    pub fn remaining(&self) -> Option<u32> {
        self.lock().remaining
    }

    /// Number of permits currently held
    pub fn in_flight(&self) -> u32 {
        self.lock().in_flight
    }

    fn release(&self, telemetry: Option<RateBudget>) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if telemetry.is_none() {
                if let Some(remaining) = state.remaining {
                    state.remaining = Some(remaining.saturating_sub(1));
                }
            }
        }
        match telemetry {
            Some(budget) => self.update(budget.remaining, budget.reset_at),
            None => self.notify.notify_waiters(),
        }
    }
}

/// A reserved request slot
///
/// Dropping a permit without settling it counts as one spent request.
#[derive(Debug)]
pub struct RatePermit<'a> {
    limiter: &'a RateLimiter,
    settled: bool,
}

impl RatePermit<'_> {
    /// Releases the slot, applying server telemetry when the response had any
    pub fn settle(mut self, telemetry: Option<RateBudget>) {
        self.settled = true;
        self.limiter.release(telemetry);
    }
}

impl Drop for RatePermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.limiter.release(None);
        }
    }
}

/// Maps a wall-clock reset time onto the monotonic clock
fn to_instant(reset_at: DateTime<Utc>) -> Instant {
    let now = Instant::now();
    match (reset_at - Utc::now()).to_std() {
        Ok(delta) => now + delta,
        Err(_) => now,
    }
}
