//! Rolling z-score anomaly scoring

use std::collections::BTreeMap;

use serde::Serialize;

use super::{Statistic, series_of};
use crate::domain::records::Labels;
use crate::domain::rollup::{RollupKey, RollupRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Fewer prior buckets than one full window
    InsufficientData,
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub warning_z: f64,
    pub critical_z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    /// `None` with insufficient data, or when the window has no spread
    pub z: Option<f64>,
    pub classification: Classification,
}

/// Score `value` against the last `window` values of `history` (oldest first)
pub fn score(history: &[f64], value: f64, window: usize, thresholds: Thresholds) -> Score {
    if window == 0 || history.len() < window {
        return Score {
            mean: None,
            std_dev: None,
            z: None,
            classification: Classification::InsufficientData,
        };
    }

    let trailing = &history[history.len() - window..];
    let n = trailing.len() as f64;
    let mean = trailing.iter().sum::<f64>() / n;
    let variance = trailing.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        let classification = if value == mean {
            Classification::Normal
        } else {
            Classification::Critical
        };
        return Score {
            mean: Some(mean),
            std_dev: Some(0.0),
            z: (value == mean).then_some(0.0),
            classification,
        };
    }

    let z = (value - mean) / std_dev;
    let classification = if z.abs() > thresholds.critical_z {
        Classification::Critical
    } else if z.abs() > thresholds.warning_z {
        Classification::Warning
    } else {
        Classification::Normal
    };

    Score {
        mean: Some(mean),
        std_dev: Some(std_dev),
        z: Some(z),
        classification,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyFinding {
    pub entity: String,
    pub metric: String,
    pub dimensions: Labels,
    pub bucket_start: i64,
    pub statistic: Statistic,
    pub value: f64,
    #[serde(flatten)]
    pub score: Score,
}

/// Score the newest bucket of every hourly series against its predecessors
pub fn detect_anomalies(
    rows: &[(RollupKey, RollupRow)],
    statistic: Statistic,
    window: usize,
    thresholds: Thresholds,
) -> Vec<AnomalyFinding> {
    let mut series: BTreeMap<_, Vec<(i64, f64)>> = BTreeMap::new();
    for (key, row) in rows {
        if let Some(value) = statistic.value(&row.agg) {
            series
                .entry(series_of(key))
                .or_default()
                .push((key.bucket_start, value));
        }
    }

    let mut findings = Vec::with_capacity(series.len());
    for ((entity, metric, dimensions), mut points) in series {
        points.sort_by_key(|(bucket, _)| *bucket);
        let Some((bucket_start, value)) = points.pop() else {
            continue;
        };
        let history: Vec<f64> = points.into_iter().map(|(_, v)| v).collect();
        let score = score(&history, value, window, thresholds);

        if matches!(
            score.classification,
            Classification::Warning | Classification::Critical
        ) {
            tracing::warn!(
                entity = %entity,
                metric = %metric,
                dimensions = %dimensions,
                bucket_start,
                value,
                z = ?score.z,
                classification = ?score.classification,
                "Anomalous rollup value"
            );
        }

        findings.push(AnomalyFinding {
            entity: entity.to_string(),
            metric: metric.to_string(),
            dimensions: dimensions.clone(),
            bucket_start,
            statistic,
            value,
            score,
        });
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rollup::{Aggregate, Tier};
    use crate::utils::time::HOUR_MS;

    const THRESHOLDS: Thresholds = Thresholds {
        warning_z: 2.0,
        critical_z: 3.0,
    };

    /// 30 values with mean 100 and population std dev 10
    fn history() -> Vec<f64> {
        (0..30).map(|i| if i % 2 == 0 { 90.0 } else { 110.0 }).collect()
    }

    #[test]
    fn test_critical_score() {
        let s = score(&history(), 145.0, 30, THRESHOLDS);
        assert_eq!(s.mean, Some(100.0));
        assert_eq!(s.std_dev, Some(10.0));
        assert!((s.z.unwrap() - 4.5).abs() < 1e-9);
        assert_eq!(s.classification, Classification::Critical);
    }

    #[test]
    fn test_normal_score() {
        let s = score(&history(), 105.0, 30, THRESHOLDS);
        assert!((s.z.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(s.classification, Classification::Normal);
    }

    #[test]
    fn test_warning_score() {
        let s = score(&history(), 75.0, 30, THRESHOLDS);
        assert!((s.z.unwrap() + 2.5).abs() < 1e-9);
        assert_eq!(s.classification, Classification::Warning);
    }

    #[test]
    fn test_insufficient_data_is_never_anomalous() {
        let short = &history()[..29];
        let s = score(short, 1_000_000.0, 30, THRESHOLDS);
        assert_eq!(s.classification, Classification::InsufficientData);
        assert_eq!(s.z, None);
    }

    #[test]
    fn test_only_trailing_window_counts() {
        let mut values = vec![1_000.0; 10];
        values.extend(history());
        let s = score(&values, 105.0, 30, THRESHOLDS);
        assert_eq!(s.mean, Some(100.0));
    }

    #[test]
    fn test_zero_spread() {
        let flat = vec![50.0; 30];
        assert_eq!(
            score(&flat, 50.0, 30, THRESHOLDS).classification,
            Classification::Normal
        );
        let s = score(&flat, 51.0, 30, THRESHOLDS);
        assert_eq!(s.classification, Classification::Critical);
        assert_eq!(s.z, None);
    }

    #[test]
    fn test_classification_serde() {
        assert_eq!(
            serde_json::to_string(&Classification::InsufficientData).unwrap(),
            r#""insufficient-data""#
        );
    }

    #[test]
    fn test_detect_uses_newest_bucket() {
        let key = |h: i64| RollupKey {
            tier: Tier::Hourly,
            bucket_start: h * HOUR_MS,
            entity: "api-1".to_string(),
            metric: "latency".to_string(),
            dimensions: Labels::new(),
        };
        let row = |v: f64| {
            let mut row = RollupRow::new(0);
            let mut agg = Aggregate::default();
            agg.observe(v);
            row.agg = agg;
            row
        };

        let mut rows: Vec<_> = history()
            .into_iter()
            .enumerate()
            .map(|(h, v)| (key(h as i64), row(v)))
            .collect();
        rows.push((key(30), row(145.0)));
        rows.reverse();

        let findings = detect_anomalies(&rows, Statistic::Max, 30, THRESHOLDS);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].bucket_start, 30 * HOUR_MS);
        assert_eq!(findings[0].value, 145.0);
        assert_eq!(findings[0].score.classification, Classification::Critical);
    }
}
