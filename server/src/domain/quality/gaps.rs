//! Missing hourly buckets per reporting entity

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::domain::rollup::{RollupKey, RollupRow, Tier};
use crate::utils::time::HOUR_MS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapFinding {
    pub entity: String,
    /// Start of each missing hour, ms
    pub missing: Vec<i64>,
}

/// Buckets of `[start, end)` stepping by `width` that are not in `observed`
pub fn missing_buckets(observed: &BTreeSet<i64>, start: i64, end: i64, width: i64) -> Vec<i64> {
    (0..)
        .map(|i| start + i * width)
        .take_while(|b| *b < end)
        .filter(|b| !observed.contains(b))
        .collect()
}

/// Compare each entity's hourly buckets in `[window_end - hours, window_end)`
/// against the contiguous set
pub fn detect_gaps(
    rows: &[(RollupKey, RollupRow)],
    entities: &[String],
    window_hours: u32,
    window_end: i64,
) -> Vec<GapFinding> {
    let window_start = window_end - i64::from(window_hours) * HOUR_MS;

    let mut observed: BTreeMap<&str, BTreeSet<i64>> = entities
        .iter()
        .map(|e| (e.as_str(), BTreeSet::new()))
        .collect();
    for (key, _) in rows.iter().filter(|(k, _)| k.tier == Tier::Hourly) {
        if let Some(buckets) = observed.get_mut(key.entity.as_str()) {
            buckets.insert(key.bucket_start);
        }
    }

    observed
        .into_iter()
        .filter_map(|(entity, buckets)| {
            let missing = missing_buckets(&buckets, window_start, window_end, HOUR_MS);
            (!missing.is_empty()).then(|| GapFinding {
                entity: entity.to_string(),
                missing,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::Labels;

    const T0: i64 = 1_704_067_200_000;

    fn row(entity: &str, hour: i64) -> (RollupKey, RollupRow) {
        (
            RollupKey {
                tier: Tier::Hourly,
                bucket_start: T0 + hour * HOUR_MS,
                entity: entity.to_string(),
                metric: "cpu".to_string(),
                dimensions: Labels::new(),
            },
            RollupRow::new(0),
        )
    }

    #[test]
    fn test_reports_exactly_missing_hours() {
        let rows: Vec<_> = [0, 1, 2, 5, 6].into_iter().map(|h| row("api-1", h)).collect();
        let findings = detect_gaps(&rows, &["api-1".to_string()], 7, T0 + 7 * HOUR_MS);
        assert_eq!(
            findings,
            vec![GapFinding {
                entity: "api-1".to_string(),
                missing: vec![T0 + 3 * HOUR_MS, T0 + 4 * HOUR_MS],
            }]
        );
    }

    #[test]
    fn test_complete_entity_has_no_finding() {
        let rows: Vec<_> = (0..7).map(|h| row("api-1", h)).collect();
        assert!(detect_gaps(&rows, &["api-1".to_string()], 7, T0 + 7 * HOUR_MS).is_empty());
    }

    #[test]
    fn test_silent_expected_entity_misses_every_hour() {
        let rows = vec![row("api-1", 0)];
        let findings = detect_gaps(
            &rows,
            &["api-1".to_string(), "api-2".to_string()],
            3,
            T0 + 3 * HOUR_MS,
        );
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].entity, "api-2");
        assert_eq!(findings[1].missing.len(), 3);
    }

    #[test]
    fn test_missing_buckets_ignores_outside_window() {
        let observed: BTreeSet<i64> = [0, 10, 40].into_iter().collect();
        assert_eq!(missing_buckets(&observed, 10, 40, 10), vec![20, 30]);
    }
}
