use serde::Deserialize;

/// Main configuration structure for Star-Sweep
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    pub output: OutputConfig,
}

/// Remote search API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ApiConfig {
    /// GraphQL endpoint URL
    pub endpoint: String,

    /// Name of the environment variable holding the API token
    pub token_env: String,

    /// Results requested per page
    pub page_size: u32,

    /// Maximum results one search query can enumerate
    pub window_cap: u64,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.github.com/graphql".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            page_size: 100,
            window_cap: 1000,
            timeout_secs: 30,
            user_agent: concat!("star-sweep/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// How the search space is divided between workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionStrategy {
    /// Contiguous ordinal ranges of the target count
    Ordinal,
    /// Buckets of a filterable numeric qualifier
    Predicate,
}

/// Crawl behaviour configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlConfig {
    /// Total repositories to collect across all workers
    pub target_total: u64,

    /// Query text every slice query starts with
    pub base_query: String,

    /// Optional extra predicate appended to every query
    pub filter: Option<String>,

    /// Partitioning strategy
    pub strategy: PartitionStrategy,

    /// Numeric search qualifier slices are expressed over
    pub qualifier: String,

    /// Ascending lower edges of the predicate buckets; the last is open-ended
    pub boundaries: Vec<u64>,

    /// Slices walked concurrently within one worker
    pub slice_concurrency: usize,

    /// Maximum repositories per storage transaction
    pub batch_size: usize,

    /// Fraction of the worker quota that must be collected for success
    pub min_success_fraction: f64,

    /// Wall-clock budget per slice (seconds, 0 disables)
    pub slice_timeout_secs: u64,

    /// How many times an oversized slice may be split
    pub max_subdivisions: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            target_total: 100_000,
            base_query: "is:public".to_string(),
            filter: None,
            strategy: PartitionStrategy::Predicate,
            qualifier: "stars".to_string(),
            boundaries: default_boundaries(),
            slice_concurrency: 1,
            batch_size: 100,
            min_success_fraction: 0.9,
            slice_timeout_secs: 0,
            max_subdivisions: 8,
        }
    }
}

/// Star-count bucket edges, fine-grained where repositories are dense
fn default_boundaries() -> Vec<u64> {
    vec![
        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 22, 24, 26, 28,
        30, 32, 35, 38, 42, 46, 51, 56, 63, 71, 80, 90, 101, 116, 133, 153, 176, 203, 234, 271,
        314, 365, 426, 498, 583, 683, 801, 939, 1101, 1291, 1516, 1781, 2091, 2458, 2891, 3401,
        4001, 4701, 5521, 6491, 7631, 8971, 10551, 12411, 14601, 17161, 20171, 23701, 27881,
        32791, 38561, 45351,
    ]
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    /// Attempts per page request, including the first
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    pub base_delay_ms: u64,

    /// Cap on the exponential delay (milliseconds)
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay (milliseconds)
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_ms: 500,
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    /// Extra wait past the advertised reset time (milliseconds)
    pub safety_margin_ms: u64,

    /// Longest acceptable suspension before giving up (seconds)
    pub max_wait_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            safety_margin_ms: 1_000,
            max_wait_secs: 3_900,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}
