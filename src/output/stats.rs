//! Statistics generation from the results database
//!
//! This module provides functionality for extracting and displaying
//! store statistics from the storage layer.

use crate::storage::{PartitionCount, RunRecord, UpsertSink};
use crate::SweepError;
use chrono::NaiveDate;

/// Number of repositories listed in the top-starred section
const TOP_LIMIT: usize = 10;

/// Store statistics summary
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    /// Total number of repositories stored
    pub total_entities: u64,

    /// Total number of star-count samples stored
    pub total_samples: u64,

    /// Repositories per partition tag
    pub by_partition: Vec<PartitionCount>,

    /// Most recent observation date
    pub latest_observed: Option<NaiveDate>,

    /// Most-starred repositories on the latest observation date
    pub top_repositories: Vec<(String, u64)>,

    /// Most recent worker run
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(SweepError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn UpsertSink) -> Result<StoreStatistics, SweepError> {
    Ok(StoreStatistics {
        total_entities: storage.count_entities()?,
        total_samples: storage.count_samples()?,
        by_partition: storage.counts_by_partition()?,
        latest_observed: storage.latest_observed_date()?,
        top_repositories: storage.top_by_stars(TOP_LIMIT)?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Store Statistics ===\n");

    println!("Overview:");
    println!("  Repositories: {}", stats.total_entities);
    println!("  Star samples: {}", stats.total_samples);
    match stats.latest_observed {
        Some(date) => println!("  Latest observation: {}", date),
        None => println!("  Latest observation: none"),
    }
    println!();

    if !stats.by_partition.is_empty() {
        println!("Repositories by Partition:");
        for partition in &stats.by_partition {
            let percentage = if stats.total_entities > 0 {
                (partition.entities as f64 / stats.total_entities as f64) * 100.0
            } else {
                0.0
            };
            println!(
                "  {}: {} ({:.1}%)",
                partition.partition_tag, partition.entities, percentage
            );
        }
        println!();
    }

    if !stats.top_repositories.is_empty() {
        println!("Most Starred ({}):", stats.top_repositories.len());
        for (name, stars) in &stats.top_repositories {
            println!("  - {} ({} stars)", name, stars);
        }
        println!();
    }

    if let Some(run) = &stats.latest_run {
        println!(
            "Latest Run: #{} worker {}/{} {} ({} collected, started {})",
            run.id,
            run.worker_index,
            run.worker_count,
            run.status.to_db_string(),
            run.collected,
            run.started_at
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Repository;
    use crate::storage::SqliteStorage;

    #[test]
    fn test_load_statistics() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        let repos: Vec<Repository> = (1..=3)
            .map(|id| Repository {
                id,
                owner: "o".to_string(),
                name: format!("r{}", id),
                url: String::new(),
                created_at: None,
                stars: id as u64 * 10,
            })
            .collect();
        let samples: Vec<_> = repos.iter().map(|r| r.sample_on(date)).collect();
        storage.write_batch(&repos, &samples, "worker_0").unwrap();
        storage.create_run(0, 1, "hash").unwrap();

        let stats = load_statistics(&storage).unwrap();
        assert_eq!(stats.total_entities, 3);
        assert_eq!(stats.total_samples, 3);
        assert_eq!(stats.latest_observed, Some(date));
        assert_eq!(stats.top_repositories[0], ("o/r3".to_string(), 30));
        assert_eq!(stats.by_partition.len(), 1);
        assert!(stats.latest_run.is_some());
    }
}
