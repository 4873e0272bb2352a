//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the UpsertSink trait.

use crate::model::{MetricSample, Repository};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StorageError, StorageResult, UpsertSink};
use crate::storage::{BatchOutcome, EntityRecord, PartitionCount, RunRecord, RunStatus};
use crate::SweepError;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(SweepError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, SweepError> {
        let conn = Connection::open(path)?;

        // Several workers may share one database file
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, SweepError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Maps constraint failures onto their own error variant
fn constraint_error(error: rusqlite::Error) -> StorageError {
    match error {
        rusqlite::Error::SqliteFailure(err, message)
            if err.code == ErrorCode::ConstraintViolation =>
        {
            StorageError::ConstraintViolation(message.unwrap_or_else(|| err.to_string()))
        }
        other => StorageError::Sqlite(other),
    }
}

/// Converts a count to SQLite's signed integer, rejecting values that do not fit
fn to_sql_int(value: u64, column: &str) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| {
        StorageError::ConstraintViolation(format!("{} value {} out of range", column, value))
    })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        worker_index: row.get(1)?,
        worker_count: row.get(2)?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        config_hash: row.get(5)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(6)?)
            .unwrap_or(RunStatus::Running),
        collected: row.get::<_, i64>(7)? as u64,
    })
}

const RUN_COLUMNS: &str =
    "id, worker_index, worker_count, started_at, finished_at, config_hash, status, collected";

impl UpsertSink for SqliteStorage {
    // ===== Batch Writes =====

    fn write_batch(
        &mut self,
        entities: &[Repository],
        samples: &[MetricSample],
        partition_tag: &str,
    ) -> StorageResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let tx = self.conn.transaction()?;

        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO entity (id, owner, name, url, created_at, canonical_name, partition_tag)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO NOTHING",
            )?;
            let mut lookup = tx.prepare_cached(
                "SELECT owner, name, url, created_at FROM entity WHERE id = ?1",
            )?;

            for entity in entities {
                let created_at = entity.created_at.map(|t| t.to_rfc3339());
                let changed = insert
                    .execute(params![
                        entity.id,
                        entity.owner,
                        entity.name,
                        entity.url,
                        created_at,
                        entity.canonical_name(),
                        partition_tag,
                    ])
                    .map_err(constraint_error)?;

                if changed == 1 {
                    outcome.inserted += 1;
                    continue;
                }

                let stored: (String, String, String, Option<String>) =
                    lookup.query_row(params![entity.id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?;

                if stored == (
                    entity.owner.clone(),
                    entity.name.clone(),
                    entity.url.clone(),
                    created_at,
                ) {
                    outcome.existing += 1;
                } else {
                    outcome.identity_conflicts += 1;
                    tracing::warn!(
                        "Identity conflict for repository {}: stored {}/{}, observed {}; keeping stored row",
                        entity.id,
                        stored.0,
                        stored.1,
                        entity.canonical_name()
                    );
                }
            }

            let mut upsert = tx.prepare_cached(
                "INSERT INTO metric_sample (entity_id, observed_date, value)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(entity_id, observed_date) DO UPDATE SET value = excluded.value",
            )?;

            for sample in samples {
                let value = to_sql_int(sample.star_count, "metric_sample.value")?;
                upsert
                    .execute(params![
                        sample.entity_id,
                        sample.observed_date.format(DATE_FORMAT).to_string(),
                        value,
                    ])
                    .map_err(constraint_error)?;
                outcome.samples_written += 1;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    // ===== Run Management =====

    fn create_run(
        &mut self,
        worker_index: u32,
        worker_count: u32,
        config_hash: &str,
    ) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO crawl_runs (worker_index, worker_count, started_at, config_hash, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                worker_index,
                worker_count,
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus, collected: u64) -> StorageResult<()> {
        let collected = to_sql_int(collected, "crawl_runs.collected")?;
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE crawl_runs SET status = ?1, finished_at = ?2, collected = ?3 WHERE id = ?4",
            params![status.to_db_string(), now, collected, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_runs WHERE id = ?1",
            RUN_COLUMNS
        ))?;

        stmt.query_row(params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_runs ORDER BY id DESC LIMIT 1",
            RUN_COLUMNS
        ))?;

        Ok(stmt.query_row([], run_from_row).optional()?)
    }

    // ===== Statistics =====

    fn count_entities(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entity", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_samples(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM metric_sample", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn get_entity(&self, id: i64) -> StorageResult<Option<EntityRecord>> {
        let entity = self
            .conn
            .query_row(
                "SELECT id, owner, name, url, created_at, canonical_name, partition_tag
                 FROM entity WHERE id = ?1",
                params![id],
                |row| {
                    Ok(EntityRecord {
                        id: row.get(0)?,
                        owner: row.get(1)?,
                        name: row.get(2)?,
                        url: row.get(3)?,
                        created_at: row.get(4)?,
                        canonical_name: row.get(5)?,
                        partition_tag: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(entity)
    }

    fn get_sample_value(
        &self,
        entity_id: i64,
        observed_date: NaiveDate,
    ) -> StorageResult<Option<u64>> {
        let value: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM metric_sample WHERE entity_id = ?1 AND observed_date = ?2",
                params![entity_id, observed_date.format(DATE_FORMAT).to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(|v| v as u64))
    }

    fn counts_by_partition(&self) -> StorageResult<Vec<PartitionCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT partition_tag, COUNT(*) FROM entity GROUP BY partition_tag ORDER BY partition_tag",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok(PartitionCount {
                    partition_tag: row.get(0)?,
                    entities: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(counts)
    }

    fn latest_observed_date(&self) -> StorageResult<Option<NaiveDate>> {
        let latest: Option<String> = self.conn.query_row(
            "SELECT MAX(observed_date) FROM metric_sample",
            [],
            |row| row.get(0),
        )?;
        Ok(latest.as_deref().and_then(parse_date))
    }

    fn top_by_stars(&self, limit: usize) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.canonical_name, s.value
             FROM metric_sample s
             JOIN entity e ON e.id = s.entity_id
             WHERE s.observed_date = (SELECT MAX(observed_date) FROM metric_sample)
             ORDER BY s.value DESC, e.id ASC
             LIMIT ?1",
        )?;

        let top = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(top)
    }
}
