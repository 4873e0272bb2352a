//! Output module for reporting crawl results
//!
//! This module handles:
//! - Printing the summary of a finished worker run
//! - Loading and printing statistics of the results store

pub mod stats;

pub use stats::{load_statistics, print_statistics, StoreStatistics};

use crate::crawler::RunReport;

/// Prints the summary of a worker run to stdout
///
/// # Arguments
///
/// * `report` - The finished run
/// * `min_success_fraction` - Fraction of the quota required for success
pub fn print_run_report(report: &RunReport, min_success_fraction: f64) {
    println!("=== Worker {}/{} ===\n", report.worker_index, report.worker_count);

    println!("Collection:");
    println!("  Quota: {}", report.quota);
    println!(
        "  Collected: {} (required {})",
        report.collected,
        report.required(min_success_fraction)
    );
    println!("  Unique owners: {}", report.unique_owners);
    println!("  Total stars: {}", report.total_stars);
    println!("  Average stars: {:.1}", report.average_stars());
    println!();

    println!("Slices:");
    println!("  Planned: {}", report.slices_planned);
    println!("  Completed: {}", report.slices_completed);
    println!("  Partial: {}", report.slices_partial);
    println!("  Subdivided: {}", report.slices_split);
    println!("  Pages fetched: {}", report.pages);
    if report.failed_batches > 0 {
        println!("  Failed batches: {}", report.failed_batches);
    }
    println!();

    println!(
        "Result: {} in {:.1}s",
        if report.succeeded(min_success_fraction) {
            "success"
        } else {
            "below threshold"
        },
        report.duration.as_secs_f64()
    );
}
