//! Partition uploader
//!
//! Encodes a partition, writes it under its content-addressed key with
//! classified retry, and records the confirmed upload in the ledger. A
//! partition that cannot be stored is copied to the quarantine directory and
//! reported as failed so its source file stays in the buffer.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;

use super::columnar::{ColumnarError, EncodedPartition, encode_partition};
use crate::core::constants::OBJECT_EXTENSION;
use crate::data::ledger::{Ledger, LedgerError, UploadedObject};
use crate::data::objects::{ObjectStore, ObjectStoreError};
use crate::domain::partition::Partition;
use crate::utils::file::write_atomic;
use crate::utils::retry::{RetryPolicy, retry_classified};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to encode partition: {0}")]
    Encode(#[from] ColumnarError),

    #[error("Upload of {path} failed after {attempts} attempts: {message}")]
    Store {
        path: String,
        attempts: u32,
        /// True when retries ran out; false for a permanent backend error
        exhausted: bool,
        message: String,
    },

    #[error("Failed to record upload: {0}")]
    Ledger(#[from] LedgerError),
}

/// Result of one successful upload
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    Uploaded {
        object: UploadedObject,
        attempts: u32,
    },
    /// The ledger already holds this exact object; nothing was written
    AlreadyPresent(UploadedObject),
}

impl UploadOutcome {
    pub fn object(&self) -> &UploadedObject {
        match self {
            Self::Uploaded { object, .. } | Self::AlreadyPresent(object) => object,
        }
    }
}

#[derive(Debug, Default)]
pub struct UploadStats {
    uploaded: AtomicU64,
    already_present: AtomicU64,
    retries: AtomicU64,
    failed: AtomicU64,
    quarantined: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStatsSnapshot {
    pub uploaded: u64,
    pub already_present: u64,
    pub retries: u64,
    pub failed: u64,
    pub quarantined: u64,
    pub bytes: u64,
}

impl UploadStats {
    pub fn snapshot(&self) -> UploadStatsSnapshot {
        UploadStatsSnapshot {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<Ledger>,
    prefix: String,
    policy: RetryPolicy,
    quarantine_dir: PathBuf,
    stats: UploadStats,
}

impl Uploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<Ledger>,
        prefix: impl Into<String>,
        policy: RetryPolicy,
        quarantine_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            ledger,
            prefix: prefix.into(),
            policy,
            quarantine_dir,
            stats: UploadStats::default(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn stats(&self) -> UploadStatsSnapshot {
        self.stats.snapshot()
    }

    /// Upload one partition
    pub async fn upload_partition(&self, partition: &Partition) -> Result<UploadOutcome, UploadError> {
        let encoded = encode_partition(partition)?;
        let path = encoded
            .key
            .object_path(&self.prefix, &encoded.fingerprint, OBJECT_EXTENSION);

        if let Some(object) = self.ledger.get(&path) {
            self.stats.already_present.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(path = %path, "Partition already uploaded");
            return Ok(UploadOutcome::AlreadyPresent(object));
        }

        let store = &self.store;
        let key = path.as_str();
        let bytes = encoded.bytes.as_slice();
        let result = retry_classified(&self.policy, ObjectStoreError::is_transient, || {
            store.put(key, bytes)
        })
        .await;

        let attempts = match result {
            Ok(((), attempts)) => attempts,
            Err(failure) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .retries
                    .fetch_add(u64::from(failure.attempts.saturating_sub(1)), Ordering::Relaxed);
                tracing::error!(
                    path = %path,
                    attempts = failure.attempts,
                    exhausted = failure.exhausted,
                    error = %failure.error,
                    "Partition upload failed"
                );
                self.quarantine(&encoded).await;
                return Err(UploadError::Store {
                    path,
                    attempts: failure.attempts,
                    exhausted: failure.exhausted,
                    message: failure.error.to_string(),
                });
            }
        };

        let object = UploadedObject {
            path: path.clone(),
            partition: encoded.key.clone(),
            fingerprint: encoded.fingerprint.clone(),
            size_bytes: encoded.bytes.len() as u64,
            record_count: encoded.record_count,
            uploaded_at: Utc::now(),
        };
        self.ledger.append(&object).await?;

        self.stats.uploaded.fetch_add(1, Ordering::Relaxed);
        self.stats
            .retries
            .fetch_add(u64::from(attempts - 1), Ordering::Relaxed);
        self.stats
            .bytes
            .fetch_add(object.size_bytes, Ordering::Relaxed);

        tracing::debug!(
            path = %path,
            records = object.record_count,
            size = object.size_bytes,
            attempts,
            "Partition uploaded"
        );

        Ok(UploadOutcome::Uploaded { object, attempts })
    }

    /// Upload partitions with bounded concurrency; results keep input order
    pub async fn upload_all(
        &self,
        partitions: Vec<Partition>,
        concurrency: usize,
    ) -> Vec<(Partition, Result<UploadOutcome, UploadError>)> {
        let mut results: Vec<_> = futures::stream::iter(partitions.into_iter().enumerate())
            .map(|(i, partition)| async move {
                let result = self.upload_partition(&partition).await;
                (i, partition, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(i, _, _)| *i);
        results.into_iter().map(|(_, p, r)| (p, r)).collect()
    }

    async fn quarantine(&self, encoded: &EncodedPartition) {
        let path = self
            .quarantine_dir
            .join(format!("{}.{}", encoded.fingerprint, OBJECT_EXTENSION));
        match write_atomic(&path, &encoded.bytes).await {
            Ok(()) => {
                self.stats.quarantined.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    path = %path.display(),
                    partition = %encoded.key,
                    "Partition quarantined"
                );
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to quarantine partition"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::data::objects::{InjectedFault, MemoryObjectStore};
    use crate::domain::partition::group;
    use crate::domain::records::{MetricKind, MetricRecord};
    use crate::domain::upload::decode_partition;
    use tempfile::TempDir;

    const T0: i64 = 1_704_067_200_000;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Some(Duration::from_millis(200)),
        }
    }

    fn partitions() -> Vec<Partition> {
        group((0..4).map(|i| MetricRecord {
            timestamp: T0 + i,
            metric_name: "latency".to_string(),
            value: i as f64,
            metric_kind: MetricKind::Gauge,
            labels: Default::default(),
            reporting_entity_id: format!("e{}", i % 2),
        }))
    }

    async fn setup() -> (TempDir, Arc<MemoryObjectStore>, Uploader) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let ledger = Arc::new(
            Ledger::open(&temp.path().join("state/ledger.jsonl"))
                .await
                .unwrap(),
        );
        let uploader = Uploader::new(
            store.clone(),
            ledger,
            "metrics",
            policy(),
            temp.path().join("quarantine"),
        );
        (temp, store, uploader)
    }

    #[tokio::test]
    async fn test_upload_writes_content_addressed_object() {
        let (_temp, store, uploader) = setup().await;
        let partition = partitions().remove(0);

        let outcome = uploader.upload_partition(&partition).await.unwrap();
        let object = outcome.object();
        assert!(object.path.starts_with("metrics/year=2024/month=01/day=01/hour=00/entity=e0/"));
        assert!(object.path.ends_with(&format!("{}.parquet", object.fingerprint)));

        let bytes = store.get(&object.path).await.unwrap();
        assert_eq!(bytes.len() as u64, object.size_bytes);
        assert_eq!(decode_partition(&bytes).unwrap().len(), partition.len());
    }

    #[tokio::test]
    async fn test_same_partition_twice_yields_one_object() {
        let (_temp, store, uploader) = setup().await;
        let partition = partitions().remove(0);

        let first = uploader.upload_partition(&partition).await.unwrap();
        let second = uploader.upload_partition(&partition).await.unwrap();

        assert!(matches!(first, UploadOutcome::Uploaded { .. }));
        assert!(matches!(second, UploadOutcome::AlreadyPresent(_)));
        assert_eq!(first.object().path, second.object().path);
        assert_eq!(store.len(), 1);
        assert_eq!(store.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_reupload_after_lost_ledger_overwrites_same_key() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let partition = partitions().remove(0);

        for run in 0..2 {
            // Fresh ledger per run simulates a crash before the ledger append
            let ledger = Arc::new(
                Ledger::open(&temp.path().join(format!("ledger{}.jsonl", run)))
                    .await
                    .unwrap(),
            );
            let uploader = Uploader::new(
                store.clone(),
                ledger,
                "metrics",
                policy(),
                temp.path().join("quarantine"),
            );
            uploader.upload_partition(&partition).await.unwrap();
        }

        assert_eq!(store.put_calls(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (_temp, store, uploader) = setup().await;
        store.inject_put_faults([InjectedFault::Transient, InjectedFault::Transient]);

        let outcome = uploader
            .upload_partition(&partitions().remove(0))
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::Uploaded { attempts: 3, .. }));
        assert_eq!(uploader.stats().retries, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let (_temp, store, uploader) = setup().await;
        store.inject_put_faults([InjectedFault::Delay(Duration::from_secs(5))]);

        let outcome = uploader
            .upload_partition(&partitions().remove(0))
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::Uploaded { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_permanent_failure_quarantines() {
        let (temp, store, uploader) = setup().await;
        store.inject_put_faults([InjectedFault::Permanent]);
        let partition = partitions().remove(0);

        let err = uploader.upload_partition(&partition).await.unwrap_err();
        match err {
            UploadError::Store {
                attempts,
                exhausted,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(!exhausted);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.is_empty());

        let stats = uploader.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.quarantined, 1);
        let mut entries = tokio::fs::read_dir(temp.path().join("quarantine"))
            .await
            .unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        assert!(entry.file_name().to_string_lossy().ends_with(".parquet"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_escalated() {
        let (_temp, store, uploader) = setup().await;
        store.inject_put_faults([
            InjectedFault::Transient,
            InjectedFault::Transient,
            InjectedFault::Transient,
        ]);

        let err = uploader
            .upload_partition(&partitions().remove(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Store {
                attempts: 3,
                exhausted: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_upload_all_keeps_order() {
        let (_temp, store, uploader) = setup().await;
        let input = partitions();
        let keys: Vec<_> = input.iter().map(|p| p.key.clone()).collect();

        let results = uploader.upload_all(input, 4).await;
        let result_keys: Vec<_> = results.iter().map(|(p, _)| p.key.clone()).collect();
        assert_eq!(keys, result_keys);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(store.len(), 2);
    }
}
