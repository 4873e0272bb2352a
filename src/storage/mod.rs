//! Storage module for persisting crawl results
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Idempotent entity and sample writes
//! - Run tracking per worker
//! - Statistics queries for reporting

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{StorageError, StorageResult, UpsertSink};

/// What one batch write did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Entities inserted by this batch
    pub inserted: usize,

    /// Entities that were already stored with the same identity
    pub existing: usize,

    /// Entities already stored with different identity fields; kept as is
    pub identity_conflicts: usize,

    /// Samples inserted or overwritten
    pub samples_written: usize,
}

/// Represents a stored repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub url: String,
    pub created_at: Option<String>,
    pub canonical_name: String,
    pub partition_tag: String,
}

/// Number of entities first inserted under a partition tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionCount {
    pub partition_tag: String,
    pub entities: u64,
}

/// Represents a worker run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub worker_index: u32,
    pub worker_count: u32,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub collected: u64,
}

/// Status of a worker run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    /// Finished, but below the success threshold
    Partial,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
