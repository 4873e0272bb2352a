//! Cursor pagination within one slice
//!
//! The walker requests pages of one slice query in order, hands each page of
//! newly admitted repositories to the caller, and decides when the slice is
//! done. Pages within a slice are strictly sequential.

use crate::api::SearchApi;
use crate::crawler::quota::Quota;
use crate::crawler::retry::{BackoffRetrier, RetryFailure};
use crate::model::{Cursor, PartitionSlice, Predicate, Repository};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Why a slice walk ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceStatus {
    /// The API reported no further pages
    Exhausted,
    /// The slice's expected upper bound or the window cap was reached
    BoundReached,
    /// The worker quota filled up
    QuotaReached,
    /// The API reports more matches than one query can enumerate
    Oversized,
    /// A request failed for good; `fatal` stops the whole run
    Aborted { reason: String, fatal: bool },
    /// The slice deadline passed
    TimedOut,
}

impl SliceStatus {
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            Self::Exhausted | Self::BoundReached | Self::QuotaReached
        )
    }
}

impl fmt::Display for SliceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "exhausted"),
            Self::BoundReached => write!(f, "bound reached"),
            Self::QuotaReached => write!(f, "quota reached"),
            Self::Oversized => write!(f, "oversized"),
            Self::Aborted { reason, .. } => write!(f, "aborted: {}", reason),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Summary of one slice walk
#[derive(Debug, Clone)]
pub struct SliceOutcome {
    pub slice: PartitionSlice,
    pub status: SliceStatus,
    /// Pages received
    pub pages: u32,
    /// Result nodes received, valid or not
    pub received: u64,
    /// Repositories admitted by the quota
    pub admitted: u64,
    /// Repositories the sink reported as stored
    pub stored: u64,
    /// Match count reported with the first page
    pub total_count: Option<u64>,
    /// True when matches beyond the window cap could not be reached
    pub coverage_incomplete: bool,
}

impl SliceOutcome {
    fn new(slice: PartitionSlice) -> Self {
        Self {
            slice,
            status: SliceStatus::Exhausted,
            pages: 0,
            received: 0,
            admitted: 0,
            stored: 0,
            total_count: None,
            coverage_incomplete: false,
        }
    }

    /// Results still expected from the slice when it stopped early
    pub fn shortfall(&self) -> u64 {
        let expected = match self.total_count {
            Some(total) => total.min(self.slice.expected_upper_bound),
            None => self.slice.expected_upper_bound,
        };
        expected.saturating_sub(self.received)
    }
}

fn is_ordinal(predicate: &Predicate) -> bool {
    matches!(predicate, Predicate::Ordinal { .. })
}

/// Walks slices through the retrier
pub struct PageWalker<A: SearchApi> {
    api: Arc<A>,
    retrier: Arc<BackoffRetrier>,
    window_cap: u64,
}

impl<A: SearchApi> Clone for PageWalker<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            retrier: Arc::clone(&self.retrier),
            window_cap: self.window_cap,
        }
    }
}

impl<A: SearchApi> PageWalker<A> {
    pub fn new(api: Arc<A>, retrier: Arc<BackoffRetrier>, window_cap: u64) -> Self {
        Self {
            api,
            retrier,
            window_cap,
        }
    }

    /// Walks one slice from the first page
    ///
    /// # Arguments
    ///
    /// * `slice` - The slice to walk
    /// * `query` - Rendered search query for the slice
    /// * `quota` - Shared worker quota; admission drops duplicates
    /// * `allow_oversize` - Return `Oversized` instead of walking a range
    ///   slice whose match count exceeds the window cap; ordinal slices are
    ///   bounded by their width and never oversized
    /// * `deadline` - Optional wall-clock limit for the whole slice
    /// * `on_page` - Receives each page of admitted repositories and
    ///   returns how many were stored
    pub async fn walk<F>(
        &self,
        slice: &PartitionSlice,
        query: &str,
        quota: &Quota,
        allow_oversize: bool,
        deadline: Option<Instant>,
        mut on_page: F,
    ) -> SliceOutcome
    where
        F: FnMut(Vec<Repository>) -> u64,
    {
        let mut outcome = SliceOutcome::new(slice.clone());
        let bound = slice.expected_upper_bound.min(self.window_cap);
        let mut cursor: Option<Cursor> = None;

        loop {
            if quota.is_exhausted() {
                outcome.status = SliceStatus::QuotaReached;
                break;
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                outcome.status = SliceStatus::TimedOut;
                break;
            }

            let label = format!("{} page {}", slice.predicate, outcome.pages + 1);
            let api = &*self.api;
            let after = cursor.as_ref();
            let result = self
                .retrier
                .call(&label, deadline, move || api.search(query, after))
                .await;

            let page = match result {
                Ok(page) => page,
                Err(RetryFailure::Deadline { .. }) => {
                    outcome.status = SliceStatus::TimedOut;
                    break;
                }
                Err(failure) => {
                    outcome.status = SliceStatus::Aborted {
                        reason: failure.to_string(),
                        fatal: failure.is_fatal(),
                    };
                    break;
                }
            };

            outcome.pages += 1;
            if outcome.pages == 1 {
                outcome.total_count = page.total_count;
                // An ordinal slice never asks for more than the window cap
                let capped = page
                    .total_count
                    .filter(|&t| t > self.window_cap && !is_ordinal(&slice.predicate));
                if let Some(total) = capped {
                    if allow_oversize {
                        tracing::debug!(
                            "Slice {} reports {} matches, above the window cap {}",
                            slice.predicate,
                            total,
                            self.window_cap
                        );
                        outcome.status = SliceStatus::Oversized;
                        break;
                    }
                    tracing::warn!(
                        "Slice {} reports {} matches but only {} are reachable; coverage incomplete",
                        slice.predicate,
                        total,
                        self.window_cap
                    );
                    outcome.coverage_incomplete = true;
                }
            }

            // Never take more of a page than the slice bound leaves room for
            let room = bound.saturating_sub(outcome.received);
            let page_received = page.received() as u64;
            let mut repositories = page.repositories;
            if page_received > room {
                repositories.truncate(room as usize);
            }
            outcome.received += page_received.min(room);
            if page.skipped > 0 {
                tracing::debug!(
                    "Slice {}: skipped {} invalid results",
                    slice.predicate,
                    page.skipped
                );
            }

            let admission = quota.admit(repositories);
            outcome.admitted += admission.accepted.len() as u64;
            tracing::debug!(
                "Slice {} page {}: {} admitted, {} duplicates",
                slice.predicate,
                outcome.pages,
                admission.accepted.len(),
                admission.duplicates
            );
            if !admission.accepted.is_empty() {
                outcome.stored += on_page(admission.accepted);
            }

            if admission.exhausted {
                outcome.status = SliceStatus::QuotaReached;
                break;
            }
            if outcome.received >= bound {
                outcome.status = SliceStatus::BoundReached;
                break;
            }
            if !page.has_next_page {
                outcome.status = SliceStatus::Exhausted;
                break;
            }
            match page.end_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    tracing::warn!(
                        "Slice {}: next page reported without a cursor, stopping",
                        slice.predicate
                    );
                    outcome.status = SliceStatus::Aborted {
                        reason: "next page reported without a cursor".to_string(),
                        fatal: false,
                    };
                    break;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeSearch;
    use crate::api::ApiError;
    use crate::crawler::rate_limiter::RateLimiter;
    use crate::crawler::retry::RetryPolicy;
    use tokio::time::Duration;

    fn walker(api: FakeSearch, window_cap: u64) -> (PageWalker<FakeSearch>, Arc<FakeSearch>) {
        let api = Arc::new(api);
        let limiter = Arc::new(RateLimiter::new(
            Duration::from_secs(1),
            Duration::from_secs(3600),
        ));
        let retrier = Arc::new(BackoffRetrier::new(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
                jitter: Duration::ZERO,
            },
            limiter,
        ));
        (PageWalker::new(api.clone(), retrier, window_cap), api)
    }

    fn range(low: u64, high: Option<u64>, bound: u64) -> PartitionSlice {
        PartitionSlice {
            predicate: Predicate::Range { low, high },
            expected_upper_bound: bound,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_walks_exactly_k_results() {
        // 23 matches, pages of 5: 5 pages, last one short
        let (walker, api) = walker(FakeSearch::with_star_ramp(23, 5, 100), 100);
        let quota = Quota::new(1_000);
        let mut pages = Vec::new();

        let outcome = walker
            .walk(
                &range(0, None, 100),
                "stars:>=0",
                &quota,
                true,
                None,
                |repos| {
                    let n = repos.len() as u64;
                    pages.push(repos);
                    n
                },
            )
            .await;

        assert_eq!(outcome.status, SliceStatus::Exhausted);
        assert_eq!(outcome.received, 23);
        assert_eq!(outcome.stored, 23);
        assert_eq!(outcome.pages, 5);
        assert_eq!(api.calls(), 5);
        assert_eq!(pages.len(), 5);

        let ids: Vec<i64> = pages.iter().flatten().map(|r| r.id).collect();
        assert_eq!(ids, (1..=23).collect::<Vec<i64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_quota() {
        let (walker, api) = walker(FakeSearch::with_star_ramp(50, 10, 100), 100);
        let quota = Quota::new(15);

        let outcome = walker
            .walk(&range(0, None, 100), "stars:>=0", &quota, true, None, |repos| {
                repos.len() as u64
            })
            .await;

        assert_eq!(outcome.status, SliceStatus::QuotaReached);
        assert_eq!(outcome.admitted, 15);
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_expected_bound() {
        let (walker, _) = walker(FakeSearch::with_star_ramp(50, 10, 100), 100);
        let quota = Quota::new(1_000);
        let slice = PartitionSlice {
            predicate: Predicate::Ordinal { start: 0, end: 20 },
            expected_upper_bound: 20,
        };

        let outcome = walker
            .walk(&slice, "stars:>=0", &quota, true, None, |repos| {
                repos.len() as u64
            })
            .await;

        assert_eq!(outcome.status, SliceStatus::BoundReached);
        assert_eq!(outcome.received, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_caps_a_page_that_overshoots() {
        // Pages of 15 against a bound of 20: the second page is cut to 5
        let (walker, api) = walker(FakeSearch::with_star_ramp(40, 15, 100), 100);
        let quota = Quota::new(1_000);
        let slice = PartitionSlice {
            predicate: Predicate::Ordinal { start: 0, end: 20 },
            expected_upper_bound: 20,
        };
        let mut ids = Vec::new();

        let outcome = walker
            .walk(&slice, "stars:>=0", &quota, false, None, |repos| {
                ids.extend(repos.iter().map(|r| r.id));
                repos.len() as u64
            })
            .await;

        assert_eq!(outcome.status, SliceStatus::BoundReached);
        assert_eq!(outcome.received, 20);
        assert_eq!(outcome.admitted, 20);
        assert_eq!(outcome.stored, 20);
        assert_eq!(quota.admitted(), 20);
        assert_eq!(api.calls(), 2);
        assert_eq!(ids, (1..=20).collect::<Vec<i64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordinal_slice_is_never_oversized() {
        // 30 matches above a cap of 10, but the slice only wants 10
        let (walker, api) = walker(FakeSearch::with_star_ramp(30, 5, 10), 10);
        let quota = Quota::new(1_000);
        let slice = PartitionSlice {
            predicate: Predicate::Ordinal { start: 0, end: 10 },
            expected_upper_bound: 10,
        };

        let outcome = walker
            .walk(&slice, "stars:>=0", &quota, true, None, |repos| {
                repos.len() as u64
            })
            .await;

        assert_eq!(outcome.status, SliceStatus::BoundReached);
        assert!(!outcome.coverage_incomplete);
        assert_eq!(outcome.stored, 10);
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_cursor_ends_the_walk() {
        let api = FakeSearch::with_star_ramp(20, 5, 100).without_cursors();
        let (walker, api) = walker(api, 100);
        let quota = Quota::new(1_000);

        let outcome = walker
            .walk(&range(0, None, 100), "stars:>=0", &quota, true, None, |repos| {
                repos.len() as u64
            })
            .await;

        assert!(matches!(
            outcome.status,
            SliceStatus::Aborted { fatal: false, .. }
        ));
        assert_eq!(outcome.pages, 1);
        assert_eq!(outcome.stored, 5);
        // The first page is never requested again
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_within_slice() {
        let api = FakeSearch::with_star_ramp(12, 5, 100);
        api.fail_next("stars:>=0", ApiError::Server { status: 502 });
        let (walker, api) = walker(api, 100);
        let quota = Quota::new(1_000);

        let outcome = walker
            .walk(&range(0, None, 100), "stars:>=0", &quota, true, None, |repos| {
                repos.len() as u64
            })
            .await;

        assert_eq!(outcome.status, SliceStatus::Exhausted);
        assert_eq!(outcome.stored, 12);
        assert_eq!(outcome.pages, 3);
        assert_eq!(api.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_slice_emits_nothing() {
        let (walker, _) = walker(FakeSearch::with_star_ramp(30, 5, 10), 10);
        let quota = Quota::new(1_000);
        let mut emitted = 0;

        let outcome = walker
            .walk(&range(0, None, 10), "stars:>=0", &quota, true, None, |repos| {
                emitted += repos.len();
                repos.len() as u64
            })
            .await;

        assert_eq!(outcome.status, SliceStatus::Oversized);
        assert_eq!(outcome.total_count, Some(30));
        assert_eq!(emitted, 0);
        assert_eq!(quota.admitted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_slice_walked_to_cap_when_unsplittable() {
        let (walker, _) = walker(FakeSearch::with_star_ramp(30, 5, 10), 10);
        let quota = Quota::new(1_000);

        let outcome = walker
            .walk(&range(0, None, 10), "stars:>=0", &quota, false, None, |repos| {
                repos.len() as u64
            })
            .await;

        assert!(outcome.coverage_incomplete);
        assert!(outcome.status.is_complete());
        assert_eq!(outcome.received, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_page_keeps_earlier_results() {
        let api = FakeSearch::with_star_ramp(20, 5, 100);
        let (walker, api) = walker(api, 100);
        let quota = Quota::new(1_000);

        // Second page and everything after fails with a rejected query
        let mut stored = 0;
        let outcome = walker
            .walk(&range(0, None, 100), "stars:>=0", &quota, true, None, |repos| {
                stored += repos.len();
                if stored == 5 {
                    api.fail_always(
                        "stars:>=0",
                        ApiError::Rejected {
                            status: Some(422),
                            message: "boom".into(),
                        },
                    );
                }
                repos.len() as u64
            })
            .await;

        assert!(matches!(
            outcome.status,
            SliceStatus::Aborted { fatal: false, .. }
        ));
        assert_eq!(outcome.stored, 5);
        assert_eq!(outcome.shortfall(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out() {
        let api = FakeSearch::with_star_ramp(20, 5, 100);
        api.fail_always("stars", ApiError::Server { status: 503 });
        let (walker, _) = walker(api, 100);
        let quota = Quota::new(1_000);

        let deadline = Instant::now() + Duration::from_millis(1500);
        let outcome = walker
            .walk(
                &range(0, None, 100),
                "stars:>=0",
                &quota,
                true,
                Some(deadline),
                |repos| repos.len() as u64,
            )
            .await;

        assert_eq!(outcome.status, SliceStatus::TimedOut);
        assert!(!outcome.status.is_complete());
    }
}
