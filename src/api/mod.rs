//! Remote search API boundary
//!
//! This module defines what the crawl engine needs from a search service:
//! - A paginated search call returning repositories plus an opaque cursor
//! - A credential check returning the current rate budget
//! - Error classification for the retry layer
//!
//! `GitHubClient` implements it against the GitHub GraphQL API.

mod github;

#[cfg(test)]
pub(crate) mod fake;

pub use github::GitHubClient;

use crate::crawler::Classification;
use crate::model::{Cursor, RateBudget, Repository};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// One page of search results
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Valid repositories on this page, in the order returned
    pub repositories: Vec<Repository>,

    /// Number of result nodes that could not be turned into a repository
    pub skipped: usize,

    /// Whether the API reports another page after this one
    pub has_next_page: bool,

    /// Cursor to pass back for the next page
    pub end_cursor: Option<Cursor>,

    /// Total matches the API reports for the query
    pub total_count: Option<u64>,

    /// Rate budget reported alongside the page
    pub rate: Option<RateBudget>,
}

impl SearchPage {
    /// Number of result nodes on the page, valid or not
    pub fn received(&self) -> usize {
        self.repositories.len() + self.skipped
    }
}

/// Errors returned by a search API call
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exhausted (resets at {reset_at:?})")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("Secondary rate limit hit (retry after {retry_after:?})")]
    SecondaryRateLimit { retry_after: Option<Duration> },

    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Could not decode response: {0}")]
    Decode(String),

    #[error("Query rejected (status {status:?}): {message}")]
    Rejected { status: Option<u16>, message: String },
}

impl ApiError {
    /// Maps the error onto the retry taxonomy
    ///
    /// | Error | Classification |
    /// |-------|----------------|
    /// | Authentication | non-retryable, fatal for the run |
    /// | Rejected (4xx, bad query) | non-retryable |
    /// | RateLimited | retryable, wait until the reset |
    /// | SecondaryRateLimit | retryable, honour `Retry-After` |
    /// | Server (5xx), Transport, Decode | retryable |
    pub fn classify(&self) -> Classification {
        match self {
            Self::Authentication(_) | Self::Rejected { .. } => Classification::NonRetryable,
            Self::RateLimited { reset_at } => Classification::Retryable {
                min_wait: reset_at.and_then(|at| (at - Utc::now()).to_std().ok()),
            },
            Self::SecondaryRateLimit { retry_after } => Classification::Retryable {
                min_wait: *retry_after,
            },
            Self::Server { .. } | Self::Transport(_) | Self::Decode(_) => {
                Classification::Retryable { min_wait: None }
            }
        }
    }

    /// Returns true when no amount of waiting will make the call succeed
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// A paginated, search-capped repository search service
///
/// Implementations are shared between concurrently walked slices, so they
/// must be cheap to call through a shared reference.
pub trait SearchApi: Send + Sync + 'static {
    /// Runs `query`, resuming after `after` when given
    fn search(
        &self,
        query: &str,
        after: Option<&Cursor>,
    ) -> impl Future<Output = Result<SearchPage, ApiError>> + Send;

    /// Checks credentials and returns the current rate budget
    fn verify(&self) -> impl Future<Output = Result<RateBudget, ApiError>> + Send;
}
