//! Star-Sweep main entry point
//!
//! This is the command-line interface for one Star-Sweep worker.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use star_sweep::config::{load_config_with_hash, read_token, Config};
use star_sweep::crawler::{run_worker, PartitionPlanner, WorkerAssignment};
use star_sweep::output::{load_statistics, print_run_report, print_statistics};
use star_sweep::storage::SqliteStorage;
use star_sweep::SweepError;
use tracing_subscriber::EnvFilter;

/// Star-Sweep: a partitioned repository star crawler
///
/// Each invocation runs one worker. Workers started with the same
/// configuration and worker count cover disjoint parts of the search space
/// and can write into the same database.
#[derive(Parser, Debug)]
#[command(name = "star-sweep")]
#[command(version)]
#[command(about = "A partitioned repository star crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Index of this worker, in 0..worker-count
    #[arg(long, default_value_t = 0)]
    worker_index: u32,

    /// Total number of workers sharing the search space
    #[arg(long, default_value_t = 1)]
    worker_count: u32,

    /// Repositories to collect across all workers (overrides the config)
    #[arg(long)]
    target_total: Option<u64>,

    /// Extra search predicate, e.g. "language:rust" (overrides the config)
    #[arg(long)]
    filter: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show this worker's slices without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

/// Process exit codes
const EXIT_BELOW_THRESHOLD: u8 = 1;
const EXIT_AUTHENTICATION: u8 = 2;
const EXIT_FAILURE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = match e.downcast_ref::<SweepError>() {
                Some(SweepError::BelowThreshold { .. }) => EXIT_BELOW_THRESHOLD,
                Some(SweepError::Authentication(_)) => EXIT_AUTHENTICATION,
                _ => EXIT_FAILURE,
            };
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .map_err(SweepError::from)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.stats {
        return handle_stats(&config);
    }

    let target_total = cli.target_total.unwrap_or(config.crawl.target_total);
    let filter = cli.filter.clone().or_else(|| config.crawl.filter.clone());
    let assignment = WorkerAssignment::new(cli.worker_index, cli.worker_count, target_total)?
        .with_filter(filter);

    if cli.dry_run {
        return handle_dry_run(&config, &assignment);
    }

    handle_crawl(config, config_hash, assignment).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("star_sweep=info,warn"),
            1 => EnvFilter::new("star_sweep=debug,info"),
            2 => EnvFilter::new("star_sweep=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows this worker's plan and queries
fn handle_dry_run(config: &Config, assignment: &WorkerAssignment) -> anyhow::Result<()> {
    let planner = PartitionPlanner::new(&config.crawl, config.api.window_cap);
    let plan = planner.plan(assignment)?;

    println!("=== Star-Sweep Dry Run ===\n");

    println!("Worker:");
    println!(
        "  Index: {} of {}",
        assignment.worker_index, assignment.worker_count
    );
    println!("  Target total: {}", assignment.target_total);
    println!("  Worker quota: {}", plan.worker_quota);
    println!("  Partition tag: {}", assignment.partition_tag());

    println!("\nAPI:");
    println!("  Endpoint: {}", config.api.endpoint);
    println!("  Page size: {}", config.api.page_size);
    println!("  Window cap: {}", config.api.window_cap);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSlices ({}):", plan.slices.len());
    for slice in &plan.slices {
        println!(
            "  - {}\n    query: {}",
            slice,
            planner.query_for(slice, assignment.filter.as_deref())
        );
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))
        .context("failed to open the results database")?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main worker run
async fn handle_crawl(
    config: Config,
    config_hash: String,
    assignment: WorkerAssignment,
) -> anyhow::Result<()> {
    let token = read_token(&config.api).map_err(SweepError::from)?;
    let min_success_fraction = config.crawl.min_success_fraction;

    tracing::info!(
        "Starting worker {}/{} into {}",
        assignment.worker_index,
        assignment.worker_count,
        config.output.database_path
    );

    let report = run_worker(config, config_hash, assignment, token).await?;
    print_run_report(&report, min_success_fraction);
    report.check(min_success_fraction)?;

    Ok(())
}
