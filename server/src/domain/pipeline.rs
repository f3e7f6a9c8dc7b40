//! Buffer -> object store -> rollups pipeline
//!
//! Four tasks connected by bounded queues:
//!
//! ```text
//! watcher --FileJob--> builder --FileBatch--> uploader --ConfirmedUpload--> rollup
//! ```
//!
//! Only the watcher listens for shutdown. When it stops it drops its sender
//! and each stage drains its queue, then drops its own sender, so work
//! already accepted is finished in order. A file is acknowledged (and then
//! deleted by the watcher) only after every one of its partitions is recorded
//! in the ledger. Folding happens after the ack; a crash in between is
//! covered by the start-up catch-up over the object store.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::partition::{BuildReport, Partition, PartitionBuilder};
use super::rollup::{FoldResult, RollupEngine, RollupError};
use super::upload::Uploader;
use super::watcher::{BufferWatcher, FileJob};
use crate::data::ledger::{LedgerError, UploadedObject};
use crate::data::objects::{ObjectStore, ObjectStoreError};
use crate::utils::retry::{RetryFailure, RetryPolicy, retry_classified};

/// Start-up failures that keep the pipeline from running
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Object store unreachable: {0}")]
    Unreachable(RetryFailure<ObjectStoreError>),

    #[error("Failed to open upload ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Failed to restore rollups: {0}")]
    Rollup(#[from] RollupError),
}

/// Probe the object store, retrying transient failures
pub async fn probe_store(
    store: &dyn ObjectStore,
    policy: &RetryPolicy,
) -> Result<u32, PipelineError> {
    let ((), attempts) = retry_classified(policy, ObjectStoreError::is_transient, || store.probe())
        .await
        .map_err(PipelineError::Unreachable)?;
    tracing::debug!(backend = store.backend_name(), attempts, "Object store reachable");
    Ok(attempts)
}

/// Partitions of one built file on their way to the uploader
#[derive(Debug)]
pub struct FileBatch {
    pub path: PathBuf,
    pub partitions: Vec<Partition>,
    pub report: BuildReport,
    pub ack: oneshot::Sender<bool>,
}

/// A partition the ledger has confirmed, ready to fold
#[derive(Debug)]
pub struct ConfirmedUpload {
    pub object: UploadedObject,
    pub partition: Partition,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    files_submitted: AtomicU64,
    files_completed: AtomicU64,
    files_retained: AtomicU64,
    files_unreadable: AtomicU64,
    records: AtomicU64,
    malformed: AtomicU64,
    partitions_stored: AtomicU64,
    partitions_failed: AtomicU64,
    partitions_folded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub files_submitted: u64,
    pub files_completed: u64,
    pub files_retained: u64,
    pub files_unreadable: u64,
    pub records: u64,
    pub malformed: u64,
    pub partitions_stored: u64,
    pub partitions_failed: u64,
    pub partitions_folded: u64,
}

impl PipelineStats {
    pub fn add_files_submitted(&self, n: u64) {
        self.files_submitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_files_completed(&self, n: u64) {
        self.files_completed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_files_retained(&self, n: u64) {
        self.files_retained.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            files_submitted: self.files_submitted.load(Ordering::Relaxed),
            files_completed: self.files_completed.load(Ordering::Relaxed),
            files_retained: self.files_retained.load(Ordering::Relaxed),
            files_unreadable: self.files_unreadable.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            partitions_stored: self.partitions_stored.load(Ordering::Relaxed),
            partitions_failed: self.partitions_failed.load(Ordering::Relaxed),
            partitions_folded: self.partitions_folded.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    builder: PartitionBuilder,
    uploader: Arc<Uploader>,
    engine: Arc<RollupEngine>,
    concurrency: usize,
    queue_capacity: usize,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(
        builder: PartitionBuilder,
        uploader: Arc<Uploader>,
        engine: Arc<RollupEngine>,
        concurrency: usize,
        queue_capacity: usize,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            builder,
            uploader,
            engine,
            concurrency: concurrency.max(1),
            queue_capacity: queue_capacity.max(1),
            stats,
        }
    }

    /// Spawn all stages. Returns the handles in start order.
    pub fn start(
        self,
        watcher: BufferWatcher,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let (job_tx, job_rx) = mpsc::channel(self.queue_capacity);
        let (batch_tx, batch_rx) = mpsc::channel(self.queue_capacity);
        let (confirmed_tx, confirmed_rx) = mpsc::channel(self.queue_capacity);

        tracing::debug!(
            queue_capacity = self.queue_capacity,
            concurrency = self.concurrency,
            "Starting pipeline"
        );

        vec![
            watcher.start(job_tx, shutdown_rx),
            tokio::spawn(run_builder(
                self.builder,
                self.stats.clone(),
                job_rx,
                batch_tx,
            )),
            tokio::spawn(run_uploader(
                self.uploader,
                self.concurrency,
                self.stats.clone(),
                batch_rx,
                confirmed_tx,
            )),
            tokio::spawn(run_rollup(self.engine, self.stats, confirmed_rx)),
        ]
    }
}

async fn run_builder(
    builder: PartitionBuilder,
    stats: Arc<PipelineStats>,
    mut jobs: mpsc::Receiver<FileJob>,
    batches: mpsc::Sender<FileBatch>,
) {
    while let Some(job) = jobs.recv().await {
        match builder.build_from_file(&job.path).await {
            Ok((partitions, report)) => {
                stats.records.fetch_add(report.records, Ordering::Relaxed);
                stats.malformed.fetch_add(report.malformed, Ordering::Relaxed);
                let batch = FileBatch {
                    path: job.path,
                    partitions,
                    report,
                    ack: job.ack,
                };
                if batches.send(batch).await.is_err() {
                    tracing::warn!("Upload stage closed, builder stopping");
                    break;
                }
            }
            Err(e) => {
                stats.files_unreadable.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(path = %job.path.display(), error = %e, "Failed to read buffer file");
                let _ = job.ack.send(false);
            }
        }
    }
    tracing::debug!("Builder stage drained");
}

async fn run_uploader(
    uploader: Arc<Uploader>,
    concurrency: usize,
    stats: Arc<PipelineStats>,
    mut batches: mpsc::Receiver<FileBatch>,
    confirmed: mpsc::Sender<ConfirmedUpload>,
) {
    while let Some(batch) = batches.recv().await {
        let total = batch.partitions.len();
        let results = uploader.upload_all(batch.partitions, concurrency).await;

        let mut failed = 0usize;
        for (partition, result) in results {
            match result {
                Ok(outcome) => {
                    stats.partitions_stored.fetch_add(1, Ordering::Relaxed);
                    let upload = ConfirmedUpload {
                        object: outcome.object().clone(),
                        partition,
                    };
                    if confirmed.send(upload).await.is_err() {
                        tracing::warn!("Rollup stage closed, fold skipped");
                    }
                }
                Err(e) => {
                    failed += 1;
                    stats.partitions_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        path = %batch.path.display(),
                        partition = %partition.key,
                        error = %e,
                        "Partition upload failed"
                    );
                }
            }
        }

        if failed == 0 {
            tracing::debug!(
                path = %batch.path.display(),
                partitions = total,
                records = batch.report.records,
                "Buffer file uploaded"
            );
        } else {
            tracing::warn!(
                path = %batch.path.display(),
                failed,
                partitions = total,
                "Buffer file partially uploaded, keeping it"
            );
        }
        let _ = batch.ack.send(failed == 0);
    }
    tracing::debug!("Upload stage drained");
}

async fn run_rollup(
    engine: Arc<RollupEngine>,
    stats: Arc<PipelineStats>,
    mut confirmed: mpsc::Receiver<ConfirmedUpload>,
) {
    while let Some(upload) = confirmed.recv().await {
        match engine.fold_partition(&upload.partition, &upload.object.fingerprint) {
            FoldResult::Applied { .. } => {
                stats.partitions_folded.fetch_add(1, Ordering::Relaxed);
            }
            // Logged by the engine
            FoldResult::AlreadyFolded | FoldResult::TooLate => {}
        }
    }
    tracing::debug!("Rollup stage drained");
}
