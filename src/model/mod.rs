//! Domain model for the crawl
//!
//! # Components
//!
//! - `Repository`: an observed repository with its current star count
//! - `MetricSample`: one star-count observation per repository per day
//! - `PartitionSlice` / `Predicate`: a bounded, disjoint query constraint
//! - `Cursor`: opaque pagination token scoped to one slice walk
//! - `RateBudget`: server-reported request budget

mod cursor;
mod repository;
mod slice;

pub use cursor::Cursor;
pub use repository::{MetricSample, RateBudget, Repository};
pub use slice::{PartitionSlice, Predicate};
