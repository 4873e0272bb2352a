//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Star-Sweep database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track worker runs
CREATE TABLE IF NOT EXISTS crawl_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    worker_index INTEGER NOT NULL,
    worker_count INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    collected INTEGER NOT NULL DEFAULT 0
);

-- One row per repository; identity columns are written once
CREATE TABLE IF NOT EXISTS entity (
    id INTEGER PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    created_at TEXT,
    canonical_name TEXT NOT NULL,
    partition_tag TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entity_partition ON entity(partition_tag);

-- One star count per repository per UTC day
CREATE TABLE IF NOT EXISTS metric_sample (
    entity_id INTEGER NOT NULL REFERENCES entity(id),
    observed_date TEXT NOT NULL,
    value INTEGER NOT NULL,
    PRIMARY KEY (entity_id, observed_date)
);

CREATE INDEX IF NOT EXISTS idx_metric_sample_date ON metric_sample(observed_date);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
