//! In-memory search service for crawler tests
//!
//! Answers `qualifier:a..b` / `qualifier:>=a` queries over a fixed set of
//! repositories, truncates results at the window cap, and can be scripted to
//! fail specific queries.

use crate::api::{ApiError, SearchApi, SearchPage};
use crate::model::{Cursor, RateBudget, Repository};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
pub(crate) struct FakeSearch {
    universe: Vec<Repository>,
    page_size: usize,
    window_cap: usize,
    failures: Mutex<HashMap<String, VecDeque<ApiError>>>,
    persistent_failures: Mutex<HashMap<String, ApiError>>,
    verify_error: Option<ApiError>,
    omit_cursors: bool,
    calls: AtomicUsize,
}

impl FakeSearch {
    pub(crate) fn new(universe: Vec<Repository>, page_size: usize, window_cap: usize) -> Self {
        Self {
            universe,
            page_size,
            window_cap,
            failures: Mutex::new(HashMap::new()),
            persistent_failures: Mutex::new(HashMap::new()),
            verify_error: None,
            omit_cursors: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Repositories `1..=count`, repository `i` having `i - 1` stars
    pub(crate) fn with_star_ramp(count: i64, page_size: usize, window_cap: usize) -> Self {
        let universe = (1..=count)
            .map(|id| repository(id, (id - 1) as u64))
            .collect();
        Self::new(universe, page_size, window_cap)
    }

    /// Queues one failure for the next search whose query contains `needle`
    pub(crate) fn fail_next(&self, needle: &str, error: ApiError) {
        self.failures
            .lock()
            .unwrap()
            .entry(needle.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fails every search whose query contains `needle`
    pub(crate) fn fail_always(&self, needle: &str, error: ApiError) {
        self.persistent_failures
            .lock()
            .unwrap()
            .insert(needle.to_string(), error);
    }

    pub(crate) fn fail_verify(mut self, error: ApiError) -> Self {
        self.verify_error = Some(error);
        self
    }

    /// Reports further pages without ever handing out an end cursor
    pub(crate) fn without_cursors(mut self) -> Self {
        self.omit_cursors = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, query: &str) -> Option<ApiError> {
        let mut failures = self.failures.lock().unwrap();
        for (needle, queue) in failures.iter_mut() {
            if query.contains(needle.as_str()) {
                if let Some(error) = queue.pop_front() {
                    return Some(error);
                }
            }
        }
        drop(failures);

        self.persistent_failures
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, error)| error.clone())
    }
}

impl SearchApi for FakeSearch {
    async fn search(&self, query: &str, after: Option<&Cursor>) -> Result<SearchPage, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.scripted_failure(query) {
            return Err(error);
        }

        let (low, high) = parse_range(query);
        let matches: Vec<&Repository> = self
            .universe
            .iter()
            .filter(|r| r.stars >= low && high.map_or(true, |h| r.stars <= h))
            .collect();

        let offset: usize = match after {
            Some(cursor) => cursor
                .as_token()
                .parse()
                .map_err(|_| ApiError::Rejected {
                    status: None,
                    message: "bad cursor".to_string(),
                })?,
            None => 0,
        };

        let visible = matches.len().min(self.window_cap);
        let end = visible.min(offset + self.page_size);
        let repositories: Vec<Repository> = matches
            .get(offset..end)
            .unwrap_or(&[])
            .iter()
            .map(|r| (*r).clone())
            .collect();

        Ok(SearchPage {
            repositories,
            skipped: 0,
            has_next_page: end < visible,
            end_cursor: (!self.omit_cursors).then(|| Cursor::from_token(end.to_string())),
            total_count: Some(matches.len() as u64),
            rate: Some(budget()),
        })
    }

    async fn verify(&self) -> Result<RateBudget, ApiError> {
        match &self.verify_error {
            Some(error) => Err(error.clone()),
            None => Ok(budget()),
        }
    }
}

pub(crate) fn repository(id: i64, stars: u64) -> Repository {
    Repository {
        id,
        owner: format!("owner{}", id % 7),
        name: format!("repo{}", id),
        url: format!("https://github.com/owner{}/repo{}", id % 7, id),
        created_at: None,
        stars,
    }
}

fn budget() -> RateBudget {
    RateBudget {
        remaining: 5_000,
        reset_at: Utc::now() + chrono::Duration::hours(1),
    }
}

/// Extracts the star range from a query; no qualifier means everything
fn parse_range(query: &str) -> (u64, Option<u64>) {
    let Some(term) = query.split_whitespace().find_map(|t| t.strip_prefix("stars:")) else {
        return (0, None);
    };
    if let Some(low) = term.strip_prefix(">=") {
        return (low.parse().unwrap_or(0), None);
    }
    match term.split_once("..") {
        Some((low, high)) => (low.parse().unwrap_or(0), high.parse().ok()),
        None => {
            let exact = term.parse().unwrap_or(0);
            (exact, Some(exact))
        }
    }
}
