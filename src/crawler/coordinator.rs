//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the worker loop that coordinates all aspects of
//! one worker's crawl, including:
//! - Verifying credentials before any search request
//! - Planning the worker's slices once
//! - Walking slices with bounded concurrency
//! - Subdividing slices the API cannot enumerate in one query
//! - Streaming results into storage in bounded batches
//! - Recording the run and producing its report

use crate::api::SearchApi;
use crate::config::Config;
use crate::crawler::planner::{PartitionPlan, PartitionPlanner, WorkerAssignment};
use crate::crawler::quota::Quota;
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::retry::{BackoffRetrier, RetryPolicy};
use crate::crawler::walker::{PageWalker, SliceOutcome, SliceStatus};
use crate::model::{MetricSample, PartitionSlice, Repository};
use crate::storage::{RunStatus, StorageError, UpsertSink};
use crate::SweepError;
use chrono::{NaiveDate, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Summary of one worker run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub worker_index: u32,
    pub worker_count: u32,
    /// Repositories this worker was asked to collect
    pub quota: u64,
    /// Repositories admitted and stored
    pub collected: u64,
    pub slices_planned: usize,
    pub slices_completed: usize,
    pub slices_partial: usize,
    /// Oversized slices that were split in two
    pub slices_split: usize,
    pub pages: u64,
    pub failed_batches: u64,
    pub unique_owners: usize,
    pub total_stars: u64,
    pub duration: Duration,
}

impl RunReport {
    fn new(assignment: &WorkerAssignment, plan: &PartitionPlan) -> Self {
        Self {
            worker_index: assignment.worker_index,
            worker_count: assignment.worker_count,
            quota: plan.worker_quota,
            collected: 0,
            slices_planned: plan.slices.len(),
            slices_completed: 0,
            slices_partial: 0,
            slices_split: 0,
            pages: 0,
            failed_batches: 0,
            unique_owners: 0,
            total_stars: 0,
            duration: Duration::ZERO,
        }
    }

    /// Repositories needed for the run to count as a success
    pub fn required(&self, min_success_fraction: f64) -> u64 {
        (self.quota as f64 * min_success_fraction).ceil() as u64
    }

    /// Returns true when enough of the quota was collected
    pub fn succeeded(&self, min_success_fraction: f64) -> bool {
        self.quota == 0 || self.collected >= self.required(min_success_fraction)
    }

    /// Fails with `BelowThreshold` when the run fell short
    pub fn check(&self, min_success_fraction: f64) -> Result<(), SweepError> {
        if self.succeeded(min_success_fraction) {
            Ok(())
        } else {
            Err(SweepError::BelowThreshold {
                collected: self.collected,
                required: self.required(min_success_fraction),
            })
        }
    }

    pub fn average_stars(&self) -> f64 {
        if self.collected == 0 {
            0.0
        } else {
            self.total_stars as f64 / self.collected as f64
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    owners: HashSet<String>,
    total_stars: u64,
}

/// Writes admitted pages into storage in bounded batches
struct SinkWriter<S> {
    storage: Arc<Mutex<S>>,
    quota: Arc<Quota>,
    batch_size: usize,
    partition_tag: String,
    observed_date: NaiveDate,
    failed_batches: AtomicU64,
    tally: Mutex<Tally>,
}

impl<S: UpsertSink> SinkWriter<S> {
    /// Stores one page, returning how many repositories were persisted
    ///
    /// A failed batch is logged and its repositories are handed back to the
    /// quota; the remaining batches are still written.
    fn write_page(&self, repositories: Vec<Repository>) -> u64 {
        let mut stored = 0;

        for chunk in repositories.chunks(self.batch_size) {
            let samples: Vec<MetricSample> = chunk
                .iter()
                .map(|r| r.sample_on(self.observed_date))
                .collect();

            let result = match self.storage.lock() {
                Ok(mut storage) => storage.write_batch(chunk, &samples, &self.partition_tag),
                Err(_) => Err(StorageError::Database("storage lock poisoned".to_string())),
            };

            match result {
                Ok(outcome) => {
                    stored += chunk.len() as u64;
                    if outcome.identity_conflicts > 0 {
                        tracing::warn!(
                            "{} repositories in batch conflicted with stored identities",
                            outcome.identity_conflicts
                        );
                    }
                    let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
                    for repo in chunk {
                        tally.owners.insert(repo.owner.clone());
                        tally.total_stars += repo.stars;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to store batch of {} repositories: {}", chunk.len(), e);
                    self.failed_batches.fetch_add(1, Ordering::Relaxed);
                    let ids: Vec<i64> = chunk.iter().map(|r| r.id).collect();
                    self.quota.forfeit(&ids);
                }
            }
        }

        stored
    }
}

/// Main worker coordinator structure
pub struct Coordinator<A: SearchApi, S: UpsertSink + Send + 'static> {
    config: Arc<Config>,
    assignment: WorkerAssignment,
    planner: PartitionPlanner,
    api: Arc<A>,
    storage: Arc<Mutex<S>>,
    retrier: Arc<BackoffRetrier>,
    config_hash: String,
}

impl<A: SearchApi, S: UpsertSink + Send + 'static> Coordinator<A, S> {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `assignment` - This worker's share of the work
    /// * `api` - The search service
    /// * `storage` - The results sink, possibly shared with other workers
    /// * `config_hash` - Hash recorded on the run
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(SweepError)` - The assignment is invalid
    pub fn new(
        config: Config,
        assignment: WorkerAssignment,
        api: A,
        storage: Arc<Mutex<S>>,
        config_hash: impl Into<String>,
    ) -> Result<Self, SweepError> {
        assignment.validate()?;

        let planner = PartitionPlanner::new(&config.crawl, config.api.window_cap);
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let retrier = Arc::new(BackoffRetrier::new(
            RetryPolicy::from_config(&config.retry),
            limiter,
        ));

        Ok(Self {
            config: Arc::new(config),
            assignment,
            planner,
            api: Arc::new(api),
            storage,
            retrier,
            config_hash: config_hash.into(),
        })
    }

    /// Computes this worker's plan without touching the API
    pub fn plan(&self) -> Result<PartitionPlan, SweepError> {
        self.planner.plan(&self.assignment)
    }

    /// Renders the search query of a slice for this worker
    pub fn query_for(&self, slice: &PartitionSlice) -> String {
        self.planner
            .query_for(slice, self.assignment.filter.as_deref())
    }

    fn lock_storage(&self) -> Result<MutexGuard<'_, S>, SweepError> {
        self.storage
            .lock()
            .map_err(|_| SweepError::Task("storage lock poisoned".to_string()))
    }

    /// Runs the worker to completion
    ///
    /// This is the core logic that:
    /// 1. Verifies credentials and reads the initial rate budget
    /// 2. Plans the worker's slices
    /// 3. Walks slices, splitting oversized ones
    /// 4. Records the run outcome
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - The run finished; check `succeeded` for coverage
    /// * `Err(SweepError::Authentication)` - Credentials were rejected
    pub async fn run(&self) -> Result<RunReport, SweepError> {
        let started = std::time::Instant::now();
        tracing::info!(
            "Worker {}/{} starting (target total {})",
            self.assignment.worker_index,
            self.assignment.worker_count,
            self.assignment.target_total
        );

        let api = &*self.api;
        let budget = self
            .retrier
            .call("verify credentials", None, move || api.verify())
            .await?;
        tracing::info!(
            "Rate budget: {} requests until {}",
            budget.remaining,
            budget.reset_at
        );

        let plan = self.plan()?;
        tracing::info!(
            "Planned {} slices, worker quota {}",
            plan.slices.len(),
            plan.worker_quota
        );

        let run_id = self.lock_storage()?.create_run(
            self.assignment.worker_index,
            self.assignment.worker_count,
            &self.config_hash,
        )?;

        let (mut report, fatal) = self.crawl(plan).await;
        report.duration = started.elapsed();

        let min_fraction = self.config.crawl.min_success_fraction;
        let status = match (&fatal, report.succeeded(min_fraction)) {
            (Some(_), _) => RunStatus::Failed,
            (None, true) => RunStatus::Completed,
            (None, false) => RunStatus::Partial,
        };
        self.lock_storage()?
            .finish_run(run_id, status, report.collected)?;

        if let Some(reason) = fatal {
            tracing::error!("Run aborted: {}", reason);
            return Err(SweepError::Authentication(reason));
        }

        tracing::info!(
            "Worker {}/{} finished: {}/{} collected, {} unique owners, {:.1} average stars in {:?}",
            report.worker_index,
            report.worker_count,
            report.collected,
            report.quota,
            report.unique_owners,
            report.average_stars(),
            report.duration
        );

        Ok(report)
    }

    /// Walks every planned slice; returns the report and any fatal reason
    async fn crawl(&self, plan: PartitionPlan) -> (RunReport, Option<String>) {
        let mut report = RunReport::new(&self.assignment, &plan);
        let quota = Arc::new(Quota::new(plan.worker_quota));
        let writer = Arc::new(SinkWriter {
            storage: Arc::clone(&self.storage),
            quota: Arc::clone(&quota),
            batch_size: self.config.crawl.batch_size.max(1),
            partition_tag: self.assignment.partition_tag(),
            observed_date: Utc::now().date_naive(),
            failed_batches: AtomicU64::new(0),
            tally: Mutex::new(Tally::default()),
        });
        let walker = PageWalker::new(
            Arc::clone(&self.api),
            Arc::clone(&self.retrier),
            self.config.api.window_cap,
        );

        let concurrency = self.config.crawl.slice_concurrency.max(1);
        let max_depth = self.config.crawl.max_subdivisions;
        let slice_timeout = match self.config.crawl.slice_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let mut queue: VecDeque<(PartitionSlice, u32)> =
            plan.slices.into_iter().map(|slice| (slice, 0)).collect();
        let mut tasks: JoinSet<(SliceOutcome, u32)> = JoinSet::new();
        let mut fatal: Option<String> = None;

        loop {
            while fatal.is_none() && tasks.len() < concurrency && !quota.is_exhausted() {
                let Some((slice, depth)) = queue.pop_front() else {
                    break;
                };

                let allow_oversize = depth < max_depth && self.planner.split(&slice).is_some();
                let query = self.query_for(&slice);
                let deadline = slice_timeout.map(|timeout| Instant::now() + timeout);
                tracing::debug!("Starting slice {}: {}", slice, query);

                let walker = walker.clone();
                let quota = Arc::clone(&quota);
                let writer = Arc::clone(&writer);
                tasks.spawn(async move {
                    let outcome = walker
                        .walk(&slice, &query, &quota, allow_oversize, deadline, |repos| {
                            writer.write_page(repos)
                        })
                        .await;
                    (outcome, depth)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((outcome, depth)) => {
                    if let Some(reason) = self.record(outcome, depth, &mut queue, &mut report) {
                        fatal = Some(reason);
                        tasks.abort_all();
                    }
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::error!("Slice task failed: {}", e);
                    report.slices_partial += 1;
                }
            }
        }

        if !queue.is_empty() && fatal.is_none() {
            tracing::info!(
                "Quota reached with {} slices left unwalked",
                queue.len()
            );
        }

        report.collected = quota.admitted();
        report.failed_batches = writer.failed_batches.load(Ordering::Relaxed);
        let tally = writer.tally.lock().unwrap_or_else(PoisonError::into_inner);
        report.unique_owners = tally.owners.len();
        report.total_stars = tally.total_stars;
        drop(tally);

        (report, fatal)
    }

    /// Folds one slice outcome into the report; returns a fatal reason if any
    fn record(
        &self,
        outcome: SliceOutcome,
        depth: u32,
        queue: &mut VecDeque<(PartitionSlice, u32)>,
        report: &mut RunReport,
    ) -> Option<String> {
        report.pages += outcome.pages as u64;

        match &outcome.status {
            SliceStatus::Oversized => match self.planner.split(&outcome.slice) {
                Some((left, right)) => {
                    tracing::info!(
                        "Slice {} reports {} matches, splitting into {} and {}",
                        outcome.slice.predicate,
                        outcome.total_count.unwrap_or_default(),
                        left.predicate,
                        right.predicate
                    );
                    report.slices_split += 1;
                    queue.push_front((right, depth + 1));
                    queue.push_front((left, depth + 1));
                }
                None => {
                    queue.push_front((outcome.slice, self.config.crawl.max_subdivisions));
                }
            },
            SliceStatus::Aborted {
                reason,
                fatal: true,
            } => {
                report.slices_partial += 1;
                return Some(reason.clone());
            }
            status if status.is_complete() => {
                report.slices_completed += 1;
                tracing::info!(
                    "Slice {} complete ({}): {} stored over {} pages",
                    outcome.slice.predicate,
                    status,
                    outcome.stored,
                    outcome.pages
                );
            }
            status => {
                report.slices_partial += 1;
                tracing::warn!(
                    "Slice {} partially completed ({}): {} stored, shortfall {}",
                    outcome.slice.predicate,
                    status,
                    outcome.stored,
                    outcome.shortfall()
                );
            }
        }

        None
    }
}
