//! Aggregate store trait

use crate::domain::records::Labels;
use crate::domain::rollup::{Aggregate, RollupKey, RollupRow, Tier};

/// Dimension value that matches any value of its key
pub const DIMENSION_WILDCARD: &str = "*";

/// Result of folding one partition's contribution into a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// The delta was merged; `reopened` when the row had been finalizable
    Applied { reopened: bool },
    /// The row already holds this fingerprint; nothing changed
    Duplicate,
}

/// Result of a compare-and-set replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    /// The stored row already covers every contribution of the candidate
    Current,
    /// Stored row and candidate each hold contributions the other lacks
    Conflict,
}

/// Row selection for scans
#[derive(Debug, Clone, PartialEq)]
pub struct RollupFilter {
    pub tier: Tier,
    /// Inclusive lower bound on bucket end overlap, ms
    pub from: Option<i64>,
    /// Exclusive upper bound on bucket start, ms
    pub to: Option<i64>,
    pub entity: Option<String>,
    pub metric: Option<String>,
    /// Exact dimension key set; a `*` value matches any value
    pub dimensions: Option<Labels>,
}

impl RollupFilter {
    pub fn tier(tier: Tier) -> Self {
        Self {
            tier,
            from: None,
            to: None,
            entity: None,
            metric: None,
            dimensions: None,
        }
    }

    /// True if the bucket overlaps `[from, to)` and every given field matches
    pub fn matches(&self, key: &RollupKey) -> bool {
        if key.tier != self.tier {
            return false;
        }
        if let Some(from) = self.from
            && key.bucket_end() <= from
        {
            return false;
        }
        if let Some(to) = self.to
            && key.bucket_start >= to
        {
            return false;
        }
        if self.entity.as_ref().is_some_and(|e| *e != key.entity) {
            return false;
        }
        if self.metric.as_ref().is_some_and(|m| *m != key.metric) {
            return false;
        }
        match &self.dimensions {
            None => true,
            Some(filter) => {
                filter.len() == key.dimensions.len()
                    && filter.iter().all(|(k, v)| {
                        key.dimensions
                            .get(k)
                            .is_some_and(|actual| v == DIMENSION_WILDCARD || v == actual)
                    })
            }
        }
    }
}

/// Keyed rollup state with single-writer-per-key mutation.
///
/// Implementations serialize mutations of one key; different keys proceed
/// in parallel.
pub trait AggregateStore: Send + Sync {
    /// Merge `delta` into the row at `key` unless `fingerprint` is already in it
    fn fold(&self, key: &RollupKey, fingerprint: &str, delta: &Aggregate, now: i64) -> FoldOutcome;

    fn query(&self, key: &RollupKey) -> Option<RollupRow>;

    /// Matching rows sorted by key
    fn scan(&self, filter: &RollupFilter) -> Vec<(RollupKey, RollupRow)>;

    /// Every row, sorted by key
    fn rows(&self) -> Vec<(RollupKey, RollupRow)>;

    /// Unconditional insert, used when restoring a snapshot
    fn insert(&self, key: RollupKey, row: RollupRow);

    fn remove(&self, key: &RollupKey) -> Option<RollupRow>;

    /// Store `row` if no row exists or the stored fingerprints are a subset
    /// of the candidate's
    fn replace_if_newer(&self, key: &RollupKey, row: RollupRow) -> ReplaceOutcome;

    /// Move an accumulating row to finalizable; false if absent or already so
    fn mark_finalizable(&self, key: &RollupKey) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::HOUR_MS;

    fn key(bucket: i64, dims: &[(&str, &str)]) -> RollupKey {
        RollupKey {
            tier: Tier::Hourly,
            bucket_start: bucket,
            entity: "api-1".to_string(),
            metric: "latency".to_string(),
            dimensions: dims.iter().copied().collect(),
        }
    }

    #[test]
    fn test_time_range_overlap() {
        let mut filter = RollupFilter::tier(Tier::Hourly);
        filter.from = Some(HOUR_MS);
        filter.to = Some(3 * HOUR_MS);

        assert!(!filter.matches(&key(0, &[])));
        assert!(filter.matches(&key(HOUR_MS, &[])));
        assert!(filter.matches(&key(2 * HOUR_MS, &[])));
        assert!(!filter.matches(&key(3 * HOUR_MS, &[])));
    }

    #[test]
    fn test_dimension_filter_exact_key_set() {
        let mut filter = RollupFilter::tier(Tier::Hourly);
        filter.dimensions = Some([("route", "/a")].into_iter().collect());

        assert!(filter.matches(&key(0, &[("route", "/a")])));
        assert!(!filter.matches(&key(0, &[("route", "/b")])));
        assert!(!filter.matches(&key(0, &[])));
        assert!(!filter.matches(&key(0, &[("route", "/a"), ("method", "GET")])));

        filter.dimensions = Some([("route", "*")].into_iter().collect());
        assert!(filter.matches(&key(0, &[("route", "/b")])));
        assert!(!filter.matches(&key(0, &[])));
    }

    #[test]
    fn test_entity_metric_and_tier() {
        let mut filter = RollupFilter::tier(Tier::Daily);
        assert!(!filter.matches(&key(0, &[])));

        filter = RollupFilter::tier(Tier::Hourly);
        filter.entity = Some("api-2".to_string());
        assert!(!filter.matches(&key(0, &[])));

        filter.entity = Some("api-1".to_string());
        filter.metric = Some("latency".to_string());
        assert!(filter.matches(&key(0, &[])));
    }
}
