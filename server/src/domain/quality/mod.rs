//! Data quality checks over the rollup tiers
//!
//! Four independent, read-only checks:
//! - `gaps` - missing hourly buckets per expected entity
//! - `duplicates` - more than one live row per normalized key (correctness alert)
//! - `freshness` - time since each entity's newest bucket
//! - `anomaly` - rolling z-score of a chosen statistic per series

pub mod anomaly;
pub mod duplicates;
pub mod freshness;
pub mod gaps;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use anomaly::{AnomalyFinding, Classification, Score, Thresholds};
pub use duplicates::DuplicateFinding;
pub use freshness::FreshnessFinding;
pub use gaps::GapFinding;

use crate::core::config::QualityConfig;
use crate::domain::records::Labels;
use crate::domain::rollup::{Aggregate, RollupEngine, RollupKey, Tier};
use crate::utils::time::{duration_millis, hour_start, millis_to_datetime, now_millis};

/// Per-bucket value fed to anomaly scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    P50,
    #[default]
    P95,
    P99,
    Mean,
    Max,
    Count,
    Sum,
}

impl Statistic {
    pub fn value(self, agg: &Aggregate) -> Option<f64> {
        match self {
            Statistic::P50 => agg.quantile(0.50),
            Statistic::P95 => agg.quantile(0.95),
            Statistic::P99 => agg.quantile(0.99),
            Statistic::Mean => agg.mean(),
            Statistic::Max => (!agg.is_empty()).then_some(agg.max),
            Statistic::Count => Some(agg.count as f64),
            Statistic::Sum => (!agg.is_empty()).then_some(agg.sum),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Statistic::P50 => "p50",
            Statistic::P95 => "p95",
            Statistic::P99 => "p99",
            Statistic::Mean => "mean",
            Statistic::Max => "max",
            Statistic::Count => "count",
            Statistic::Sum => "sum",
        };
        f.write_str(s)
    }
}

/// `(entity, metric, dimensions)` of a row, independent of its bucket
pub(crate) fn series_of(key: &RollupKey) -> (&str, &str, &Labels) {
    (&key.entity, &key.metric, &key.dimensions)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualitySummary {
    pub entities: usize,
    pub gaps: usize,
    pub duplicates: usize,
    pub stale: usize,
    pub warnings: usize,
    pub criticals: usize,
    pub insufficient_data: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub generated_at: DateTime<Utc>,
    pub summary: QualitySummary,
    pub gaps: Vec<GapFinding>,
    pub duplicates: Vec<DuplicateFinding>,
    pub freshness: Vec<FreshnessFinding>,
    pub anomalies: Vec<AnomalyFinding>,
}

pub struct QualityMonitor {
    engine: Arc<RollupEngine>,
    config: QualityConfig,
    latest: RwLock<Option<Arc<QualityReport>>>,
}

impl QualityMonitor {
    pub fn new(engine: Arc<RollupEngine>, config: QualityConfig) -> Self {
        Self {
            engine,
            config,
            latest: RwLock::new(None),
        }
    }

    /// Most recent report, if any check has run yet
    pub fn latest(&self) -> Option<Arc<QualityReport>> {
        self.latest.read().clone()
    }

    pub fn run(&self) -> Arc<QualityReport> {
        self.run_at(now_millis())
    }

    /// Run all checks as of `now` and keep the report
    pub fn run_at(&self, now: i64) -> Arc<QualityReport> {
        let hourly = self.engine.live_rows_at(Tier::Hourly, now);
        let mut all_rows = hourly.clone();
        all_rows.extend(self.engine.live_rows_at(Tier::Daily, now));

        let entities: Vec<String> = if self.config.expected_entities.is_empty() {
            hourly
                .iter()
                .map(|(k, _)| k.entity.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        } else {
            self.config.expected_entities.clone()
        };

        // The current hour is still filling up
        let gaps = gaps::detect_gaps(
            &hourly,
            &entities,
            self.config.gap_window_hours,
            hour_start(now),
        );
        let duplicates = duplicates::detect_duplicates(&all_rows);
        let freshness = freshness::check_freshness(
            &hourly,
            &entities,
            duration_millis(self.config.staleness),
            now,
        );
        // Only closed buckets are scored; a partially filled hour would
        // always look like a drop
        let closed: Vec<_> = hourly
            .iter()
            .filter(|(key, _)| key.bucket_end() <= now)
            .cloned()
            .collect();
        let anomalies = anomaly::detect_anomalies(
            &closed,
            self.config.statistic,
            self.config.anomaly_window,
            Thresholds {
                warning_z: self.config.warning_z,
                critical_z: self.config.critical_z,
            },
        );

        let count = |c: Classification| {
            anomalies
                .iter()
                .filter(|a| a.score.classification == c)
                .count()
        };
        let summary = QualitySummary {
            entities: entities.len(),
            gaps: gaps.len(),
            duplicates: duplicates.len(),
            stale: freshness.iter().filter(|f| f.stale).count(),
            warnings: count(Classification::Warning),
            criticals: count(Classification::Critical),
            insufficient_data: count(Classification::InsufficientData),
        };

        tracing::info!(
            entities = summary.entities,
            gaps = summary.gaps,
            duplicates = summary.duplicates,
            stale = summary.stale,
            warnings = summary.warnings,
            criticals = summary.criticals,
            "Quality checks finished"
        );

        let report = Arc::new(QualityReport {
            generated_at: millis_to_datetime(now).unwrap_or_else(Utc::now),
            summary,
            gaps,
            duplicates,
            freshness,
            anomalies,
        });
        *self.latest.write() = Some(report.clone());
        report
    }

    /// Run the checks every `quality.interval` until shutdown
    pub fn start(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.config.interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tick.tick() => {
                        self.run();
                    }
                }
            }
            tracing::debug!("Quality monitor shutdown complete");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RollupConfig;
    use crate::data::rollups::MemoryAggregateStore;
    use crate::domain::partition::group;
    use crate::domain::records::{MetricKind, MetricRecord};
    use crate::domain::upload::encode_partition;
    use crate::utils::time::HOUR_MS;

    const T0: i64 = 1_704_067_200_000;

    fn fold(engine: &RollupEngine, entity: &str, hour: i64, value: f64) {
        let records = vec![MetricRecord {
            timestamp: T0 + hour * HOUR_MS,
            metric_name: "latency".to_string(),
            value,
            metric_kind: MetricKind::Gauge,
            labels: Labels::new(),
            reporting_entity_id: entity.to_string(),
        }];
        let partition = group(records).remove(0);
        let fp = encode_partition(&partition).unwrap().fingerprint;
        engine.fold_partition_at(&partition, &fp, T0 + hour * HOUR_MS + 1);
    }

    fn monitor(config: QualityConfig) -> (Arc<RollupEngine>, QualityMonitor) {
        let engine = Arc::new(RollupEngine::new(
            &RollupConfig::default(),
            Arc::new(MemoryAggregateStore::new()),
        ));
        (engine.clone(), QualityMonitor::new(engine, config))
    }

    #[test]
    fn test_statistic_serde_and_value() {
        let s: Statistic = serde_json::from_str(r#""p99""#).unwrap();
        assert_eq!(s, Statistic::P99);
        assert_eq!(Statistic::default().to_string(), "p95");

        let mut agg = Aggregate::default();
        assert_eq!(Statistic::Max.value(&agg), None);
        assert_eq!(Statistic::Count.value(&agg), Some(0.0));
        agg.observe(4.0);
        agg.observe(6.0);
        assert_eq!(Statistic::Mean.value(&agg), Some(5.0));
        assert_eq!(Statistic::Sum.value(&agg), Some(10.0));
    }

    #[test]
    fn test_report_combines_checks() {
        let (engine, monitor) = monitor(QualityConfig {
            gap_window_hours: 7,
            anomaly_window: 3,
            expected_entities: vec!["api-1".to_string(), "api-2".to_string()],
            ..QualityConfig::default()
        });
        for h in [0, 1, 2, 5, 6] {
            fold(&engine, "api-1", h, 100.0);
        }
        assert!(monitor.latest().is_none());

        let report = monitor.run_at(T0 + 7 * HOUR_MS + 60_000);
        assert_eq!(report.summary.entities, 2);
        assert_eq!(report.summary.duplicates, 0);

        let api1 = report.gaps.iter().find(|g| g.entity == "api-1").unwrap();
        assert_eq!(api1.missing, vec![T0 + 3 * HOUR_MS, T0 + 4 * HOUR_MS]);
        let api2 = report.gaps.iter().find(|g| g.entity == "api-2").unwrap();
        assert_eq!(api2.missing.len(), 7);

        assert!(report.freshness.iter().any(|f| f.entity == "api-2" && f.stale));
        assert!(report.freshness.iter().any(|f| f.entity == "api-1" && !f.stale));

        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].score.classification, Classification::Normal);

        assert!(monitor.latest().is_some());
    }

    #[test]
    fn test_entities_default_to_those_seen() {
        let (engine, monitor) = monitor(QualityConfig::default());
        fold(&engine, "api-9", 0, 1.0);
        let report = monitor.run_at(T0 + HOUR_MS);
        assert_eq!(report.summary.entities, 1);
        assert_eq!(report.freshness[0].entity, "api-9");
    }

    #[test]
    fn test_open_hour_is_not_scored() {
        let (engine, monitor) = monitor(QualityConfig {
            statistic: Statistic::Mean,
            anomaly_window: 30,
            ..QualityConfig::default()
        });
        for h in 0..31 {
            fold(&engine, "api-1", h, if h % 2 == 0 { 90.0 } else { 110.0 });
        }
        // Two minutes into hour 31, a single low point has arrived so far
        fold(&engine, "api-1", 31, 2.0);

        let report = monitor.run_at(T0 + 31 * HOUR_MS + 120_000);
        assert_eq!(report.anomalies.len(), 1);
        let finding = &report.anomalies[0];
        assert_eq!(finding.bucket_start, T0 + 30 * HOUR_MS);
        assert_eq!(finding.value, 90.0);
        assert_eq!(finding.score.classification, Classification::Normal);
        assert_eq!(report.summary.criticals, 0);

        // Once the hour closes it is scored like any other
        let report = monitor.run_at(T0 + 32 * HOUR_MS);
        assert_eq!(report.anomalies[0].bucket_start, T0 + 31 * HOUR_MS);
        assert_eq!(report.anomalies[0].score.classification, Classification::Critical);
    }
}
