//! Star-Sweep: a partitioned repository star crawler
//!
//! This crate collects repositories and their daily star counts from a
//! search-capped, rate-limited API. Independent workers each cover a disjoint
//! slice of the search space and write into an idempotent store, so any
//! worker can be re-run without corrupting earlier results.

pub mod api;
pub mod config;
pub mod crawler;
pub mod model;
pub mod output;
pub mod storage;

use thiserror::Error;

/// Main error type for Star-Sweep operations
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote API error: {0}")]
    Api(#[from] api::ApiError),

    #[error("Authentication to the remote API failed: {0}")]
    Authentication(String),

    #[error("Rate limit: {0}")]
    RateLimit(#[from] crawler::RateLimitError),

    #[error("Invalid worker assignment: {0}")]
    InvalidAssignment(String),

    #[error("Collected {collected} repositories, below the required {required}")]
    BelowThreshold { collected: u64, required: u64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Worker task failed: {0}")]
    Task(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Missing credential: environment variable {0} is not set")]
    MissingToken(String),
}

/// Result type alias for Star-Sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, RunReport, WorkerAssignment};
pub use model::{Cursor, MetricSample, PartitionSlice, Predicate, Repository};
