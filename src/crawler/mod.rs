//! Crawler module for partitioned repository collection
//!
//! This module contains the core crawling logic, including:
//! - Partition planning across independent workers
//! - Rate budget tracking and retry with backoff
//! - Cursor pagination within a slice
//! - Overall worker coordination

mod coordinator;
mod planner;
mod quota;
mod rate_limiter;
mod retry;
mod walker;

pub use coordinator::{Coordinator, RunReport};
pub use planner::{PartitionPlan, PartitionPlanner, WorkerAssignment};
pub use quota::{Admission, Quota};
pub use rate_limiter::{Gate, RateLimitError, RateLimiter, RatePermit};
pub use retry::{
    AttemptState, BackoffRetrier, Classification, RateTelemetry, RetryFailure, RetryPolicy, Step,
};
pub use walker::{PageWalker, SliceOutcome, SliceStatus};

use crate::api::GitHubClient;
use crate::config::Config;
use crate::storage::SqliteStorage;
use crate::SweepError;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Runs one worker against the GitHub API and the configured database
///
/// This is the main entry point for a worker process. It will:
/// 1. Build the HTTP client
/// 2. Open the results database
/// 3. Verify credentials, plan and walk this worker's slices
/// 4. Record the run and return its report
///
/// # Arguments
///
/// * `config` - The crawler configuration
/// * `config_hash` - Hash of the configuration file, stored on the run
/// * `assignment` - This worker's share of the work
/// * `token` - API token
///
/// # Returns
///
/// * `Ok(RunReport)` - The run finished; the caller checks the threshold
/// * `Err(SweepError)` - Setup failed or credentials were rejected
pub async fn run_worker(
    config: Config,
    config_hash: String,
    assignment: WorkerAssignment,
    token: String,
) -> Result<RunReport, SweepError> {
    let client = GitHubClient::new(&config.api, token)?;
    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;

    let coordinator = Coordinator::new(
        config,
        assignment,
        client,
        Arc::new(Mutex::new(storage)),
        config_hash,
    )?;
    coordinator.run().await
}
