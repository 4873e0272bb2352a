use chrono::{DateTime, NaiveDate, Utc};

/// A repository observed in search results
///
/// Identity fields (`id`, `owner`, `name`, `url`, `created_at`) never change
/// once stored. `stars` is the metric observed at fetch time and only ever
/// lands in the sample table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Stable numeric id assigned by the remote service
    pub id: i64,

    /// Owning user or organisation login
    pub owner: String,

    /// Repository name without the owner
    pub name: String,

    /// Canonical web URL
    pub url: String,

    /// Creation timestamp, if reported
    pub created_at: Option<DateTime<Utc>>,

    /// Star count at observation time
    pub stars: u64,
}

impl Repository {
    /// Returns `owner/name`, always derived from the identity fields
    pub fn canonical_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Checks the invariants a repository must satisfy before it is stored
    pub fn validate(&self) -> Result<(), String> {
        if self.id <= 0 {
            return Err(format!("repository id must be positive, got {}", self.id));
        }
        if self.owner.is_empty() || self.name.is_empty() {
            return Err(format!(
                "repository {} is missing its owner or name",
                self.id
            ));
        }
        Ok(())
    }

    /// Builds the star-count sample for this repository on the given day
    pub fn sample_on(&self, observed_date: NaiveDate) -> MetricSample {
        MetricSample {
            entity_id: self.id,
            observed_date,
            star_count: self.stars,
        }
    }
}

/// One star-count observation, keyed by `(entity_id, observed_date)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSample {
    pub entity_id: i64,
    pub observed_date: NaiveDate,
    pub star_count: u64,
}

/// Request budget as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    /// Requests left in the current window
    pub remaining: u32,

    /// When the window resets
    pub reset_at: DateTime<Utc>,
}
