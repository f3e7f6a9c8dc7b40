//! Duplicate rollup row tripwire
//!
//! Rows are grouped by their normalized key: tier, bucket aligned to the tier
//! width, entity, metric and dimensions. More than one live row per group
//! means the fold bookkeeping is broken. Findings are alerts, never repaired.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::records::Labels;
use crate::domain::rollup::{RollupKey, RollupRow, Tier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateFinding {
    pub tier: Tier,
    pub bucket_start: i64,
    pub entity: String,
    pub metric: String,
    pub dimensions: Labels,
    pub rows: usize,
}

pub fn detect_duplicates(rows: &[(RollupKey, RollupRow)]) -> Vec<DuplicateFinding> {
    let mut groups: BTreeMap<(Tier, i64, &str, &str, &Labels), usize> = BTreeMap::new();
    for (key, _) in rows {
        let aligned = key.tier.bucket_start(key.bucket_start);
        *groups
            .entry((
                key.tier,
                aligned,
                key.entity.as_str(),
                key.metric.as_str(),
                &key.dimensions,
            ))
            .or_default() += 1;
    }

    groups
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|((tier, bucket_start, entity, metric, dimensions), n)| {
            tracing::error!(
                tier = %tier,
                bucket_start,
                entity,
                metric,
                dimensions = %dimensions,
                rows = n,
                "Duplicate rollup rows detected"
            );
            DuplicateFinding {
                tier,
                bucket_start,
                entity: entity.to_string(),
                metric: metric.to_string(),
                dimensions: dimensions.clone(),
                rows: n,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::HOUR_MS;

    fn key(bucket: i64) -> RollupKey {
        RollupKey {
            tier: Tier::Hourly,
            bucket_start: bucket,
            entity: "api-1".to_string(),
            metric: "cpu".to_string(),
            dimensions: Labels::new(),
        }
    }

    #[test]
    fn test_distinct_rows_are_clean() {
        let rows = vec![(key(0), RollupRow::new(0)), (key(HOUR_MS), RollupRow::new(0))];
        assert!(detect_duplicates(&rows).is_empty());
    }

    #[test]
    fn test_misaligned_row_is_flagged() {
        let rows = vec![(key(0), RollupRow::new(0)), (key(17), RollupRow::new(0))];
        let findings = detect_duplicates(&rows);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].bucket_start, 0);
        assert_eq!(findings[0].rows, 2);
    }
}
