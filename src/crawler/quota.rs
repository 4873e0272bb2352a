//! Per-worker collection quota with duplicate suppression

use crate::model::Repository;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of offering a page of repositories to the quota
#[derive(Debug, Default)]
pub struct Admission {
    /// Repositories admitted, in the order offered
    pub accepted: Vec<Repository>,

    /// Repositories dropped because this worker already admitted them
    pub duplicates: usize,

    /// True once the quota is full
    pub exhausted: bool,
}

#[derive(Debug, Default)]
struct QuotaState {
    seen: HashSet<i64>,
    admitted: u64,
}

/// Shared budget of repositories one worker may collect
///
/// Slices walked concurrently admit against the same quota, so the worker
/// never collects more than its share.
#[derive(Debug)]
pub struct Quota {
    limit: u64,
    state: Mutex<QuotaState>,
}

impl Quota {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            state: Mutex::new(QuotaState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits unseen repositories until the quota is full
    pub fn admit(&self, repositories: Vec<Repository>) -> Admission {
        let mut state = self.lock();
        let mut admission = Admission::default();

        for repo in repositories {
            if state.admitted >= self.limit {
                break;
            }
            if !state.seen.insert(repo.id) {
                admission.duplicates += 1;
                continue;
            }
            state.admitted += 1;
            admission.accepted.push(repo);
        }

        admission.exhausted = state.admitted >= self.limit;
        admission
    }

    /// Returns admitted ids to the pool after they failed to persist
    pub fn forfeit(&self, ids: &[i64]) {
        let mut state = self.lock();
        for id in ids {
            if state.seen.remove(id) {
                state.admitted -= 1;
            }
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn admitted(&self) -> u64 {
        self.lock().admitted
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.admitted())
    }

    pub fn is_exhausted(&self) -> bool {
        self.admitted() >= self.limit
    }
}
