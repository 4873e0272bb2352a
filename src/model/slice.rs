use std::fmt;

/// A query constraint selecting one disjoint part of the search space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// Ordinal positions in `[start, end)`
    ///
    /// The search API cannot address result positions, so an ordinal range
    /// is queried as the same range of qualifier values (star counts by
    /// default): `Ordinal { start: 0, end: 5 }` renders as `stars:0..4`.
    Ordinal { start: u64, end: u64 },

    /// Attribute values in `low..=high`, or `low..` when `high` is `None`
    Range { low: u64, high: Option<u64> },
}

impl Predicate {
    /// Returns true if `value` falls inside this predicate
    pub fn contains(&self, value: u64) -> bool {
        match *self {
            Self::Ordinal { start, end } => value >= start && value < end,
            Self::Range { low, high } => value >= low && high.map_or(true, |h| value <= h),
        }
    }

    /// Number of positions/values covered, `None` when open-ended
    pub fn width(&self) -> Option<u64> {
        match *self {
            Self::Ordinal { start, end } => Some(end.saturating_sub(start)),
            Self::Range { low, high } => high.map(|h| h.saturating_sub(low) + 1),
        }
    }

    /// Splits into two disjoint halves that together cover `self`
    ///
    /// Open-ended ranges split at a doubling pivot so the finite half stays
    /// bounded. Returns `None` when only a single value is covered.
    pub fn split(&self) -> Option<(Predicate, Predicate)> {
        match *self {
            Self::Ordinal { start, end } => {
                if end.saturating_sub(start) < 2 {
                    return None;
                }
                let mid = start + (end - start) / 2;
                Some((
                    Self::Ordinal { start, end: mid },
                    Self::Ordinal { start: mid, end },
                ))
            }
            Self::Range {
                low,
                high: Some(high),
            } => {
                if high <= low {
                    return None;
                }
                let mid = low + (high - low) / 2;
                Some((
                    Self::Range {
                        low,
                        high: Some(mid),
                    },
                    Self::Range {
                        low: mid + 1,
                        high: Some(high),
                    },
                ))
            }
            Self::Range { low, high: None } => {
                if low == u64::MAX {
                    return None;
                }
                let pivot = low.saturating_mul(2).max(low + 1);
                Some((
                    Self::Range {
                        low,
                        high: Some(pivot - 1),
                    },
                    Self::Range {
                        low: pivot,
                        high: None,
                    },
                ))
            }
        }
    }

    /// Renders the predicate as a search qualifier, e.g. `stars:10..19`
    pub fn render(&self, qualifier: &str) -> String {
        match *self {
            Self::Ordinal { start, end } => {
                format!("{}:{}..{}", qualifier, start, end.saturating_sub(1))
            }
            Self::Range {
                low,
                high: Some(high),
            } => format!("{}:{}..{}", qualifier, low, high),
            Self::Range { low, high: None } => format!("{}:>={}", qualifier, low),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Ordinal { start, end } => write!(f, "ordinal[{}, {})", start, end),
            Self::Range {
                low,
                high: Some(high),
            } => write!(f, "range[{}, {}]", low, high),
            Self::Range { low, high: None } => write!(f, "range[{}, inf)", low),
        }
    }
}

/// One partition of the search space assigned to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSlice {
    /// The query constraint for this slice
    pub predicate: Predicate,

    /// Upper bound on results this slice is expected to yield
    pub expected_upper_bound: u64,
}

impl fmt::Display for PartitionSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (<= {})", self.predicate, self.expected_upper_bound)
    }
}
