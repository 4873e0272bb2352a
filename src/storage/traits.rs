//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::model::{MetricSample, Repository};
use crate::storage::{BatchOutcome, EntityRecord, PartitionCount, RunRecord, RunStatus};
use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Idempotent sink for crawl results
///
/// Every write must be safe to repeat: entities are insert-once and samples
/// are last-write-wins per `(entity_id, observed_date)`.
pub trait UpsertSink {
    // ===== Batch Writes =====

    /// Writes entities and their samples in one transaction
    ///
    /// # Arguments
    ///
    /// * `entities` - Repositories to insert if absent
    /// * `samples` - Star counts to upsert
    /// * `partition_tag` - Tag recorded on newly inserted entities
    ///
    /// # Returns
    ///
    /// * `Ok(BatchOutcome)` - Counts of what the batch did
    /// * `Err(StorageError)` - The batch was rolled back entirely
    fn write_batch(
        &mut self,
        entities: &[Repository],
        samples: &[MetricSample],
        partition_tag: &str,
    ) -> StorageResult<BatchOutcome>;

    // ===== Run Management =====

    /// Records the start of a worker run
    fn create_run(
        &mut self,
        worker_index: u32,
        worker_count: u32,
        config_hash: &str,
    ) -> StorageResult<i64>;

    /// Records the end of a worker run
    fn finish_run(&mut self, run_id: i64, status: RunStatus, collected: u64) -> StorageResult<()>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    // ===== Statistics =====

    /// Counts stored entities
    fn count_entities(&self) -> StorageResult<u64>;

    /// Counts stored samples
    fn count_samples(&self) -> StorageResult<u64>;

    /// Gets an entity by id
    fn get_entity(&self, id: i64) -> StorageResult<Option<EntityRecord>>;

    /// Gets the star count of an entity on a day
    fn get_sample_value(&self, entity_id: i64, observed_date: NaiveDate)
        -> StorageResult<Option<u64>>;

    /// Entity counts per partition tag, sorted by tag
    fn counts_by_partition(&self) -> StorageResult<Vec<PartitionCount>>;

    /// Most recent observation date, if any sample exists
    fn latest_observed_date(&self) -> StorageResult<Option<NaiveDate>>;

    /// Repositories with the most stars on the latest observation date
    fn top_by_stars(&self, limit: usize) -> StorageResult<Vec<(String, u64)>>;
}
