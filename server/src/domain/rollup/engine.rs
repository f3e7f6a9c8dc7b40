//! Rollup engine
//!
//! Folds uploaded partitions into hourly rows exactly once per partition
//! fingerprint, re-derives the affected daily rows from the 24 hourly rows
//! of their day, and runs the row lifecycle sweep.
//!
//! Folds take the shared side of `gate`; snapshots take the exclusive side so
//! the persisted rows and fold records always describe the same state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::state::{Aggregate, BucketState, FoldRecord, FoldSet, RollupKey, RollupRow};
use super::tier::{Tier, TierSpec};
use crate::core::config::RollupConfig;
use crate::core::constants::OBJECT_EXTENSION;
use crate::data::ledger::Ledger;
use crate::data::objects::{ObjectStore, ObjectStoreError};
use crate::data::rollups::{AggregateStore, FoldOutcome, ReplaceOutcome, RollupFilter};
use crate::domain::partition::{Partition, parse_object_path};
use crate::domain::records::Labels;
use crate::domain::upload::{ColumnarError, decode_partition};
use crate::utils::file::write_atomic;
use crate::utils::time::{HOUR_MS, day_start, duration_millis, now_millis};

/// Snapshot layout version
const SNAPSHOT_VERSION: u8 = 1;

/// Daily re-derivation attempts before giving up on a conflicting row
const MAX_DERIVE_ATTEMPTS: usize = 4;

#[derive(Debug, Error)]
pub enum RollupError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Snapshot decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Snapshot task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Unsupported snapshot version {0}")]
    SnapshotVersion(u8),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("Object decode error: {0}")]
    Columnar(#[from] ColumnarError),
}

/// What happened to one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldResult {
    Applied { rows: usize, reopened: usize },
    AlreadyFolded,
    /// Arrived after its hour's lateness window closed
    TooLate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub finalized: usize,
    pub expired: usize,
    pub pruned_folds: usize,
    pub pruned_ledger: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatchUpReport {
    pub listed: usize,
    pub folded: usize,
    pub already_folded: usize,
    pub too_late: usize,
    pub failed: usize,
}

/// Read model of one row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupView {
    pub tier: Tier,
    pub bucket_start: i64,
    pub bucket_end: i64,
    pub entity: String,
    pub metric: String,
    pub dimensions: Labels,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub quantile: Option<f64>,
    pub state: BucketState,
}

impl RollupView {
    fn new(key: RollupKey, row: &RollupRow, quantile: Option<f64>) -> Self {
        let bucket_end = key.bucket_end();
        Self {
            tier: key.tier,
            bucket_start: key.bucket_start,
            bucket_end,
            entity: key.entity,
            metric: key.metric,
            dimensions: key.dimensions,
            count: row.agg.count,
            sum: row.agg.sum,
            min: row.agg.min,
            max: row.agg.max,
            mean: row.agg.mean().unwrap_or(0.0),
            quantile: quantile.and_then(|q| row.agg.quantile(q)),
            state: row.state,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RollupSnapshot {
    version: u8,
    taken_at: i64,
    rows: Vec<(RollupKey, RollupRow)>,
    folds: Vec<FoldRecord>,
}

#[derive(Debug, Default)]
struct RollupStats {
    partitions_folded: AtomicU64,
    duplicates_skipped: AtomicU64,
    rejected_late: AtomicU64,
    rows_reopened: AtomicU64,
    rows_finalized: AtomicU64,
    rows_expired: AtomicU64,
    derive_conflicts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollupStatsSnapshot {
    pub partitions_folded: u64,
    pub duplicates_skipped: u64,
    pub rejected_late: u64,
    pub rows_reopened: u64,
    pub rows_finalized: u64,
    pub rows_expired: u64,
    pub derive_conflicts: u64,
    pub rows: usize,
    pub folds: usize,
}

pub struct RollupEngine {
    store: Arc<dyn AggregateStore>,
    folds: Arc<FoldSet>,
    hourly: TierSpec,
    daily: TierSpec,
    grace_ms: i64,
    dimensions: Vec<Vec<String>>,
    snapshot_path: Option<PathBuf>,
    ledger: Option<Arc<Ledger>>,
    gate: Arc<RwLock<()>>,
    stats: RollupStats,
}

impl RollupEngine {
    /// Engine without persistence
    pub fn new(config: &RollupConfig, store: Arc<dyn AggregateStore>) -> Self {
        let dimensions = if config.dimensions.is_empty() {
            vec![Vec::new()]
        } else {
            config.dimensions.clone()
        };
        Self {
            store,
            folds: Arc::new(FoldSet::new()),
            hourly: TierSpec::hourly(config),
            daily: TierSpec::daily(config),
            grace_ms: duration_millis(config.grace),
            dimensions,
            snapshot_path: None,
            ledger: None,
            gate: Arc::new(RwLock::new(())),
            stats: RollupStats::default(),
        }
    }

    /// Engine persisted at `snapshot_path`, restored from it if present
    pub async fn open(
        config: &RollupConfig,
        store: Arc<dyn AggregateStore>,
        snapshot_path: PathBuf,
    ) -> Result<Self, RollupError> {
        let mut engine = Self::new(config, store);

        match tokio::fs::read(&snapshot_path).await {
            Ok(bytes) => {
                let snapshot: RollupSnapshot = rmp_serde::from_slice(&bytes)?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(RollupError::SnapshotVersion(snapshot.version));
                }
                let rows = snapshot.rows.len();
                for (key, row) in snapshot.rows {
                    engine.store.insert(key, row);
                }
                engine.folds = Arc::new(FoldSet::from_records(snapshot.folds));
                tracing::debug!(
                    path = %snapshot_path.display(),
                    rows,
                    folds = engine.folds.len(),
                    "Rollup snapshot restored"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %snapshot_path.display(), "No rollup snapshot yet");
            }
            Err(e) => return Err(e.into()),
        }

        engine.snapshot_path = Some(snapshot_path);
        Ok(engine)
    }

    /// Let the sweep prune the upload ledger index along with fold records
    pub fn with_ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Hours that ended before this instant can no longer be folded, so
    /// their fold records and ledger entries may go
    pub fn fold_horizon_at(&self, now: i64) -> i64 {
        now.saturating_sub(self.hourly.ttl_ms)
            .saturating_sub(self.hourly.lateness_ms)
    }

    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    pub fn hourly_spec(&self) -> TierSpec {
        self.hourly
    }

    pub fn daily_spec(&self) -> TierSpec {
        self.daily
    }

    fn spec(&self, tier: Tier) -> &TierSpec {
        match tier {
            Tier::Hourly => &self.hourly,
            Tier::Daily => &self.daily,
        }
    }

    pub fn is_folded(&self, fingerprint: &str) -> bool {
        self.folds.contains(Tier::Hourly, fingerprint)
    }

    pub fn fold_partition(&self, partition: &Partition, fingerprint: &str) -> FoldResult {
        self.fold_partition_at(partition, fingerprint, now_millis())
    }

    /// Fold one partition as of `now` (ms)
    pub fn fold_partition_at(&self, partition: &Partition, fingerprint: &str, now: i64) -> FoldResult {
        if self.is_folded(fingerprint) {
            self.stats.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(partition = %partition.key, fingerprint, "Partition already folded");
            return FoldResult::AlreadyFolded;
        }

        let hour = partition.key.hour_start_ms();
        if !self.hourly.accepts(hour, now) {
            self.stats.rejected_late.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                partition = %partition.key,
                fingerprint,
                "Partition arrived after lateness window, not folded"
            );
            return FoldResult::TooLate;
        }

        let mut deltas: HashMap<RollupKey, Aggregate> = HashMap::new();
        for record in &partition.records {
            for dims in &self.dimensions {
                let key = RollupKey {
                    tier: Tier::Hourly,
                    bucket_start: hour,
                    entity: partition.key.entity.clone(),
                    metric: record.metric_name.clone(),
                    dimensions: record.labels.project(dims),
                };
                deltas.entry(key).or_default().observe(record.value);
            }
        }

        let _gate = self.gate.read();

        let mut rows = 0;
        let mut reopened = 0;
        for (key, delta) in &deltas {
            match self.store.fold(key, fingerprint, delta, now) {
                FoldOutcome::Applied { reopened: r } => {
                    rows += 1;
                    reopened += usize::from(r);
                }
                FoldOutcome::Duplicate => {}
            }
        }
        self.folds.insert(Tier::Hourly, fingerprint, hour);

        let day = day_start(hour);
        if self.daily.accepts(day, now) {
            for series in deltas.keys() {
                reopened += self.derive_daily(series, day, now);
            }
        }

        self.stats.partitions_folded.fetch_add(1, Ordering::Relaxed);
        self.stats
            .rows_reopened
            .fetch_add(reopened as u64, Ordering::Relaxed);

        tracing::debug!(
            partition = %partition.key,
            fingerprint,
            records = partition.len(),
            rows,
            reopened,
            "Partition folded"
        );

        FoldResult::Applied { rows, reopened }
    }

    /// Rebuild the daily row of `series` from its hourly rows; returns 1 if
    /// a finalizable daily row was reopened
    fn derive_daily(&self, series: &RollupKey, day: i64, now: i64) -> usize {
        let daily_key = series.with_bucket(Tier::Daily, day);

        for _ in 0..MAX_DERIVE_ATTEMPTS {
            let mut row = RollupRow::new(now);
            for h in 0..24 {
                let hourly_key = series.with_bucket(Tier::Hourly, day + h * HOUR_MS);
                if let Some(hourly) = self.store.query(&hourly_key) {
                    row.agg.merge(&hourly.agg);
                    row.fingerprints.extend(hourly.fingerprints);
                }
            }
            if row.agg.is_empty() {
                return 0;
            }

            let was_finalizable = self
                .store
                .query(&daily_key)
                .is_some_and(|r| r.state == BucketState::Finalizable);

            match self.store.replace_if_newer(&daily_key, row) {
                ReplaceOutcome::Replaced => return usize::from(was_finalizable),
                ReplaceOutcome::Current => return 0,
                ReplaceOutcome::Conflict => {
                    self.stats.derive_conflicts.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        tracing::warn!(
            entity = %series.entity,
            metric = %series.metric,
            day,
            "Daily rollup re-derivation kept conflicting"
        );
        0
    }

    pub fn sweep(&self, is_cancelled: impl Fn() -> bool) -> SweepReport {
        self.sweep_at(now_millis(), is_cancelled)
    }

    /// Finalize and expire rows as of `now`; stops between rows once
    /// `is_cancelled` returns true
    pub fn sweep_at(&self, now: i64, is_cancelled: impl Fn() -> bool) -> SweepReport {
        let mut report = SweepReport::default();

        for (key, row) in self.store.rows() {
            if is_cancelled() {
                report.cancelled = true;
                break;
            }
            let spec = self.spec(key.tier);
            if spec.is_expired(key.bucket_start, now) {
                let _gate = self.gate.read();
                if self.store.remove(&key).is_some() {
                    report.expired += 1;
                }
            } else if row.state == BucketState::Accumulating
                && now >= key.bucket_end().saturating_add(self.grace_ms)
                && self.store.mark_finalizable(&key)
            {
                report.finalized += 1;
            }
        }

        if !report.cancelled {
            let horizon = self.fold_horizon_at(now);
            {
                let _gate = self.gate.read();
                report.pruned_folds = self
                    .folds
                    .prune(Tier::Hourly, horizon.saturating_sub(Tier::Hourly.width_ms()));
            }
            if let Some(ledger) = &self.ledger {
                report.pruned_ledger = ledger.prune_before(horizon);
            }
        }

        self.stats
            .rows_finalized
            .fetch_add(report.finalized as u64, Ordering::Relaxed);
        self.stats
            .rows_expired
            .fetch_add(report.expired as u64, Ordering::Relaxed);

        if report.finalized + report.expired + report.pruned_folds + report.pruned_ledger > 0 {
            tracing::debug!(
                finalized = report.finalized,
                expired = report.expired,
                pruned_folds = report.pruned_folds,
                pruned_ledger = report.pruned_ledger,
                cancelled = report.cancelled,
                "Rollup sweep finished"
            );
        }

        report
    }

    pub fn query(&self, filter: &RollupFilter, quantile: Option<f64>) -> Vec<RollupView> {
        self.query_at(filter, quantile, now_millis())
    }

    /// Rows matching `filter`; rows past their TTL are hidden even before
    /// the sweep removes them
    pub fn query_at(&self, filter: &RollupFilter, quantile: Option<f64>, now: i64) -> Vec<RollupView> {
        let spec = self.spec(filter.tier);
        self.store
            .scan(filter)
            .into_iter()
            .filter(|(key, _)| !spec.is_expired(key.bucket_start, now))
            .map(|(key, row)| RollupView::new(key, &row, quantile))
            .collect()
    }

    /// Live rows of one tier as of `now`
    pub fn live_rows_at(&self, tier: Tier, now: i64) -> Vec<(RollupKey, RollupRow)> {
        let spec = self.spec(tier);
        self.store
            .scan(&RollupFilter::tier(tier))
            .into_iter()
            .filter(|(key, _)| !spec.is_expired(key.bucket_start, now))
            .collect()
    }

    /// Write the snapshot; a no-op for engines without a snapshot path
    pub async fn persist(&self) -> Result<(), RollupError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        // Cloning every row under the exclusive gate stalls folds; keep it
        // off the async workers
        let store = self.store.clone();
        let folds = self.folds.clone();
        let gate = self.gate.clone();
        let (snapshot, bytes) = tokio::task::spawn_blocking(move || {
            let snapshot = {
                let _gate = gate.write();
                RollupSnapshot {
                    version: SNAPSHOT_VERSION,
                    taken_at: now_millis(),
                    rows: store.rows(),
                    folds: folds.records(),
                }
            };
            rmp_serde::to_vec_named(&snapshot).map(|bytes| (snapshot, bytes))
        })
        .await??;
        write_atomic(path, &bytes).await?;

        tracing::debug!(
            path = %path.display(),
            rows = snapshot.rows.len(),
            folds = snapshot.folds.len(),
            size = bytes.len(),
            "Rollup snapshot written"
        );
        Ok(())
    }

    pub async fn catch_up(
        &self,
        objects: &dyn ObjectStore,
        prefix: &str,
    ) -> Result<CatchUpReport, RollupError> {
        self.catch_up_at(objects, prefix, now_millis()).await
    }

    /// Fold every stored object not yet folded, e.g. after a crash between
    /// upload and fold
    pub async fn catch_up_at(
        &self,
        objects: &dyn ObjectStore,
        prefix: &str,
        now: i64,
    ) -> Result<CatchUpReport, RollupError> {
        let list_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };
        let paths = objects.list(&list_prefix).await?;
        let mut report = CatchUpReport {
            listed: paths.len(),
            ..Default::default()
        };

        for path in paths {
            let Some((key, fingerprint)) = parse_object_path(&path, prefix, OBJECT_EXTENSION)
            else {
                tracing::debug!(path = %path, "Ignoring foreign object");
                continue;
            };
            if self.is_folded(&fingerprint) {
                report.already_folded += 1;
                continue;
            }
            if !self.hourly.accepts(key.hour_start_ms(), now) {
                report.too_late += 1;
                continue;
            }

            let partition = match objects.get(&path).await {
                Ok(bytes) => match decode_partition(&bytes) {
                    Ok(partition) => partition,
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(path = %path, error = %e, "Stored object is unreadable");
                        continue;
                    }
                },
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(path = %path, error = %e, "Failed to fetch object for catch-up");
                    continue;
                }
            };

            match self.fold_partition_at(&partition, &fingerprint, now) {
                FoldResult::Applied { .. } => report.folded += 1,
                FoldResult::AlreadyFolded => report.already_folded += 1,
                FoldResult::TooLate => report.too_late += 1,
            }
        }

        tracing::info!(
            listed = report.listed,
            folded = report.folded,
            already_folded = report.already_folded,
            too_late = report.too_late,
            failed = report.failed,
            "Rollup catch-up finished"
        );
        Ok(report)
    }

    pub fn stats(&self) -> RollupStatsSnapshot {
        RollupStatsSnapshot {
            partitions_folded: self.stats.partitions_folded.load(Ordering::Relaxed),
            duplicates_skipped: self.stats.duplicates_skipped.load(Ordering::Relaxed),
            rejected_late: self.stats.rejected_late.load(Ordering::Relaxed),
            rows_reopened: self.stats.rows_reopened.load(Ordering::Relaxed),
            rows_finalized: self.stats.rows_finalized.load(Ordering::Relaxed),
            rows_expired: self.stats.rows_expired.load(Ordering::Relaxed),
            derive_conflicts: self.stats.derive_conflicts.load(Ordering::Relaxed),
            rows: self.store.len(),
            folds: self.folds.len(),
        }
    }

    /// Periodic sweep and snapshot until shutdown. The last snapshot is
    /// written by the shutdown service once the pipeline has drained.
    pub fn start_maintenance(
        self: Arc<Self>,
        sweep_interval: Duration,
        snapshot_interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_tick = tokio::time::interval(sweep_interval);
            let mut snapshot_tick = tokio::time::interval(snapshot_interval);
            sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            snapshot_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the immediate first ticks
            sweep_tick.tick().await;
            snapshot_tick.tick().await;

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = sweep_tick.tick() => {
                        let rx = shutdown_rx.clone();
                        self.sweep(|| *rx.borrow());
                    }
                    _ = snapshot_tick.tick() => {
                        if let Err(e) = self.persist().await {
                            tracing::error!(error = %e, "Failed to write rollup snapshot");
                        }
                    }
                }
            }

            tracing::debug!("Rollup maintenance shutdown complete");
        })
    }
}
