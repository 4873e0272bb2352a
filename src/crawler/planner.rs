//! Partition planning
//!
//! Divides the search space into slices that are:
//! - Disjoint between workers, computed from `(worker_index, worker_count)`
//!   alone so workers never need to talk to each other
//! - Small enough for one query to enumerate under the result window
//! - Rendered as ordinary search qualifiers

use crate::config::{CrawlConfig, PartitionStrategy};
use crate::model::{PartitionSlice, Predicate};
use crate::SweepError;

/// Which share of the work this process owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub worker_index: u32,
    pub worker_count: u32,
    pub target_total: u64,
    pub filter: Option<String>,
}

impl WorkerAssignment {
    /// Creates a validated assignment
    ///
    /// # Returns
    ///
    /// * `Err(SweepError::InvalidAssignment)` - `worker_count` is zero or
    ///   `worker_index` is out of range
    pub fn new(
        worker_index: u32,
        worker_count: u32,
        target_total: u64,
    ) -> Result<Self, SweepError> {
        let assignment = Self {
            worker_index,
            worker_count,
            target_total,
            filter: None,
        };
        assignment.validate()?;
        Ok(assignment)
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if self.worker_count == 0 {
            return Err(SweepError::InvalidAssignment(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.worker_index >= self.worker_count {
            return Err(SweepError::InvalidAssignment(format!(
                "worker_index {} is out of range for {} workers",
                self.worker_index, self.worker_count
            )));
        }
        Ok(())
    }

    /// Tag stored on every entity this worker inserts first
    pub fn partition_tag(&self) -> String {
        format!("worker_{}", self.worker_index)
    }
}

/// The slices and quota of one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub worker_quota: u64,
    pub slices: Vec<PartitionSlice>,
}

/// Computes slices for worker assignments
#[derive(Debug, Clone)]
pub struct PartitionPlanner {
    strategy: PartitionStrategy,
    base_query: String,
    qualifier: String,
    boundaries: Vec<u64>,
    window_cap: u64,
}

impl PartitionPlanner {
    pub fn new(crawl: &CrawlConfig, window_cap: u64) -> Self {
        Self {
            strategy: crawl.strategy,
            base_query: crawl.base_query.clone(),
            qualifier: crawl.qualifier.clone(),
            boundaries: crawl.boundaries.clone(),
            window_cap: window_cap.max(1),
        }
    }

    /// Computes the slices and quota for one worker
    pub fn plan(&self, assignment: &WorkerAssignment) -> Result<PartitionPlan, SweepError> {
        assignment.validate()?;

        let count = assignment.worker_count as u64;
        let index = assignment.worker_index as u64;
        let worker_quota = share(assignment.target_total, count, index);

        let slices = match self.strategy {
            PartitionStrategy::Ordinal => {
                let start = offset(assignment.target_total, count, index);
                self.ordinal_slices(start, start + worker_quota)
            }
            PartitionStrategy::Predicate => {
                let buckets = self.buckets(assignment.worker_count as usize);
                let n = buckets.len() as u64;
                let first = offset(n, count, index) as usize;
                let len = share(n, count, index) as usize;
                buckets[first..first + len]
                    .iter()
                    .map(|&predicate| PartitionSlice {
                        predicate,
                        expected_upper_bound: self.window_cap,
                    })
                    .collect()
            }
        };

        tracing::debug!(
            "Worker {}/{}: quota {}, {} slices",
            assignment.worker_index,
            assignment.worker_count,
            worker_quota,
            slices.len()
        );

        Ok(PartitionPlan {
            worker_quota,
            slices,
        })
    }

    /// Halves a slice, or returns `None` when it covers a single value
    pub fn split(&self, slice: &PartitionSlice) -> Option<(PartitionSlice, PartitionSlice)> {
        let (left, right) = slice.predicate.split()?;
        Some((self.slice_for(left), self.slice_for(right)))
    }

    /// Renders the full search query for a slice
    pub fn query_for(&self, slice: &PartitionSlice, filter: Option<&str>) -> String {
        let predicate = slice.predicate.render(&self.qualifier);
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if !self.base_query.trim().is_empty() {
            parts.push(self.base_query.trim());
        }
        if let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) {
            parts.push(filter);
        }
        parts.push(&predicate);
        parts.join(" ")
    }

    fn slice_for(&self, predicate: Predicate) -> PartitionSlice {
        let expected_upper_bound = match predicate {
            Predicate::Ordinal { .. } => predicate.width().unwrap_or(self.window_cap),
            Predicate::Range { .. } => self.window_cap,
        };
        PartitionSlice {
            predicate,
            expected_upper_bound,
        }
    }

    /// Cuts `[start, end)` into pieces no wider than the window cap
    fn ordinal_slices(&self, start: u64, end: u64) -> Vec<PartitionSlice> {
        let mut slices = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let stop = end.min(cursor + self.window_cap);
            slices.push(PartitionSlice {
                predicate: Predicate::Ordinal {
                    start: cursor,
                    end: stop,
                },
                expected_upper_bound: stop - cursor,
            });
            cursor = stop;
        }
        slices
    }

    /// Builds the bucket list, splitting buckets until every worker has one
    fn buckets(&self, workers: usize) -> Vec<Predicate> {
        let mut buckets: Vec<Predicate> = self
            .boundaries
            .windows(2)
            .map(|w| Predicate::Range {
                low: w[0],
                high: Some(w[1] - 1),
            })
            .collect();
        if let Some(&last) = self.boundaries.last() {
            buckets.push(Predicate::Range {
                low: last,
                high: None,
            });
        }

        while buckets.len() < workers {
            let widest = buckets
                .iter()
                .enumerate()
                .filter_map(|(i, p)| p.width().filter(|&w| w > 1).map(|w| (i, w)))
                .max_by_key(|&(i, w)| (w, std::cmp::Reverse(i)))
                .map(|(i, _)| i);

            let target = match widest {
                Some(i) => i,
                None => match buckets.last() {
                    Some(Predicate::Range { high: None, .. }) => buckets.len() - 1,
                    _ => break,
                },
            };

            match buckets[target].split() {
                Some((left, right)) => {
                    buckets[target] = left;
                    buckets.insert(target + 1, right);
                }
                None => break,
            }
        }

        buckets
    }
}

/// Units owned by worker `index` when `total` is divided among `count`
///
/// The first `total % count` workers get one extra unit.
fn share(total: u64, count: u64, index: u64) -> u64 {
    total / count + u64::from(index < total % count)
}

/// First unit owned by worker `index`
fn offset(total: u64, count: u64, index: u64) -> u64 {
    index * (total / count) + index.min(total % count)
}
