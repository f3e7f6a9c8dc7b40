//! Mergeable rollup state

use std::collections::BTreeSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::sketch::QuantileSketch;
use super::tier::Tier;
use crate::domain::records::Labels;

/// Identity of one rollup row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RollupKey {
    pub tier: Tier,
    /// Bucket start, ms since epoch
    pub bucket_start: i64,
    pub entity: String,
    pub metric: String,
    /// Record labels projected onto one configured dimension set
    pub dimensions: Labels,
}

impl RollupKey {
    pub fn bucket_end(&self) -> i64 {
        self.bucket_start + self.tier.width_ms()
    }

    /// The same series in another bucket or tier
    pub fn with_bucket(&self, tier: Tier, bucket_start: i64) -> Self {
        Self {
            tier,
            bucket_start,
            entity: self.entity.clone(),
            metric: self.metric.clone(),
            dimensions: self.dimensions.clone(),
        }
    }
}

/// count / sum / min / max plus a quantile sketch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub sketch: QuantileSketch,
}

impl Default for Aggregate {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sketch: QuantileSketch::default(),
        }
    }
}

impl Aggregate {
    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sketch.insert(value);
    }

    pub fn merge(&mut self, other: &Aggregate) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sketch.merge(&other.sketch);
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Approximate quantile, clamped to the exact min and max
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        if q <= 0.0 {
            return Some(self.min);
        }
        if q >= 1.0 {
            return Some(self.max);
        }
        self.sketch
            .quantile(q)
            .map(|v| v.clamp(self.min, self.max))
    }
}

/// Lifecycle of a stored row; EMPTY and EXPIRED rows do not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketState {
    Accumulating,
    Finalizable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRow {
    pub agg: Aggregate,
    pub state: BucketState,
    /// Partition fingerprints folded into this row
    pub fingerprints: BTreeSet<String>,
    /// Last mutation, ms since epoch
    pub updated_at: i64,
}

impl RollupRow {
    pub fn new(now: i64) -> Self {
        Self {
            agg: Aggregate::default(),
            state: BucketState::Accumulating,
            fingerprints: BTreeSet::new(),
            updated_at: now,
        }
    }
}

/// One `(tier, fingerprint)` fold, kept until its bucket can no longer
/// accept contributions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldRecord {
    pub tier: Tier,
    pub fingerprint: String,
    pub bucket_start: i64,
}

/// Processed-partition set of the rollup engine
#[derive(Debug, Default)]
pub struct FoldSet {
    folds: DashMap<(Tier, String), i64>,
}

impl FoldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = FoldRecord>) -> Self {
        let set = Self::new();
        for r in records {
            set.folds.insert((r.tier, r.fingerprint), r.bucket_start);
        }
        set
    }

    pub fn contains(&self, tier: Tier, fingerprint: &str) -> bool {
        self.folds.contains_key(&(tier, fingerprint.to_string()))
    }

    /// Returns false if the fold was already recorded
    pub fn insert(&self, tier: Tier, fingerprint: &str, bucket_start: i64) -> bool {
        self.folds
            .insert((tier, fingerprint.to_string()), bucket_start)
            .is_none()
    }

    /// Drop fold records of `tier` whose bucket started before `cutoff`
    pub fn prune(&self, tier: Tier, cutoff: i64) -> usize {
        let before = self.folds.len();
        self.folds
            .retain(|(t, _), bucket_start| *t != tier || *bucket_start >= cutoff);
        before - self.folds.len()
    }

    pub fn records(&self) -> Vec<FoldRecord> {
        let mut records: Vec<_> = self
            .folds
            .iter()
            .map(|e| FoldRecord {
                tier: e.key().0,
                fingerprint: e.key().1.clone(),
                bucket_start: *e.value(),
            })
            .collect();
        records.sort_by(|a, b| {
            (a.tier, a.bucket_start, &a.fingerprint).cmp(&(b.tier, b.bucket_start, &b.fingerprint))
        });
        records
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(values: &[f64]) -> Aggregate {
        let mut agg = Aggregate::default();
        values.iter().for_each(|&v| agg.observe(v));
        agg
    }

    #[test]
    fn test_aggregate_observe() {
        let agg = aggregate(&[3.0, 1.0, 2.0]);
        assert_eq!(agg.count, 3);
        assert_eq!(agg.sum, 6.0);
        assert_eq!(agg.min, 1.0);
        assert_eq!(agg.max, 3.0);
        assert_eq!(agg.mean(), Some(2.0));
        assert_eq!(agg.quantile(0.0), Some(1.0));
        assert_eq!(agg.quantile(1.0), Some(3.0));
    }

    #[test]
    fn test_empty_aggregate() {
        let agg = Aggregate::default();
        assert!(agg.is_empty());
        assert_eq!(agg.mean(), None);
        assert_eq!(agg.quantile(0.5), None);

        // Merging an empty aggregate is the identity
        let mut merged = aggregate(&[5.0]);
        merged.merge(&agg);
        assert_eq!(merged, aggregate(&[5.0]));
    }

    #[test]
    fn test_merge_associativity() {
        let a = aggregate(&[1.0, 7.0, 3.0]);
        let b = aggregate(&[10.0, -2.0]);
        let c = aggregate(&[4.0, 4.0, 100.0]);

        let mut ab_c = a.clone();
        ab_c.merge(&b);
        ab_c.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);

        assert_eq!(ab_c.count, a_bc.count);
        assert_eq!(ab_c.sum, a_bc.sum);
        assert_eq!(ab_c.min, a_bc.min);
        assert_eq!(ab_c.max, a_bc.max);
        assert_eq!(ab_c.sketch, a_bc.sketch);
        assert_eq!(ab_c.quantile(0.5), a_bc.quantile(0.5));
    }

    #[test]
    fn test_fold_set() {
        let folds = FoldSet::new();
        assert!(folds.insert(Tier::Hourly, "fp1", 0));
        assert!(!folds.insert(Tier::Hourly, "fp1", 0));
        assert!(folds.insert(Tier::Daily, "fp1", 0));
        assert!(folds.insert(Tier::Hourly, "fp2", 10));
        assert!(folds.contains(Tier::Hourly, "fp1"));
        assert!(!folds.contains(Tier::Daily, "fp2"));

        assert_eq!(folds.prune(Tier::Hourly, 5), 1);
        assert!(!folds.contains(Tier::Hourly, "fp1"));
        assert!(folds.contains(Tier::Daily, "fp1"));

        let restored = FoldSet::from_records(folds.records());
        assert_eq!(restored.len(), 2);
        assert!(restored.contains(Tier::Hourly, "fp2"));
    }
}
