//! Append-only upload ledger
//!
//! Every confirmed upload is appended as one JSON line to `state/ledger.jsonl`
//! and fsynced before the upload counts as done. The log is never rewritten;
//! on open it is replayed into an in-memory index keyed by object path.
//! Entries for hours that can no longer be folded are dropped from the index
//! by `prune_before`; the log keeps them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::partition::PartitionKey;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger encode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable record of one stored partition object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedObject {
    pub path: String,
    pub partition: PartitionKey,
    pub fingerprint: String,
    pub size_bytes: u64,
    pub record_count: u64,
    pub uploaded_at: DateTime<Utc>,
}

pub struct Ledger {
    path: PathBuf,
    file: Mutex<File>,
    index: DashMap<String, UploadedObject>,
}

impl Ledger {
    /// Open (or create) the ledger and replay it.
    ///
    /// A torn last line left by a crash mid-append is cut off; undecodable
    /// lines elsewhere are skipped with a warning.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let index = DashMap::new();
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let complete = data
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);

        let mut skipped = 0usize;
        for line in data[..complete].split(|&b| b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<UploadedObject>(line) {
                Ok(object) => {
                    index.insert(object.path.clone(), object);
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(error = %e, "Skipping undecodable ledger line");
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        if complete < data.len() {
            tracing::warn!(
                path = %path.display(),
                torn_bytes = data.len() - complete,
                "Truncating torn ledger tail"
            );
            file.set_len(complete as u64).await?;
            file.sync_all().await?;
        }

        tracing::debug!(
            path = %path.display(),
            entries = index.len(),
            skipped,
            "Ledger replayed"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, object_path: &str) -> bool {
        self.index.contains_key(object_path)
    }

    pub fn get(&self, object_path: &str) -> Option<UploadedObject> {
        self.index.get(object_path).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// All entries, sorted by object path
    pub fn objects(&self) -> Vec<UploadedObject> {
        let mut objects: Vec<_> = self.index.iter().map(|e| e.value().clone()).collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        objects
    }

    /// Drop index entries whose partition hour ended before `cutoff` (ms).
    /// Returns how many were dropped.
    pub fn prune_before(&self, cutoff: i64) -> usize {
        let before = self.index.len();
        self.index
            .retain(|_, object| object.partition.hour_end_ms() >= cutoff);
        let pruned = before - self.index.len();
        if pruned > 0 {
            tracing::debug!(pruned, remaining = self.index.len(), "Ledger index pruned");
        }
        pruned
    }

    /// Append an entry and fsync. Returns false if the path was already recorded.
    pub async fn append(&self, object: &UploadedObject) -> Result<bool, LedgerError> {
        let mut line = serde_json::to_vec(object)?;
        line.push(b'\n');

        // The file lock also serializes the check against concurrent appends
        let mut file = self.file.lock().await;
        if self.index.contains_key(&object.path) {
            return Ok(false);
        }
        file.write_all(&line).await?;
        file.sync_data().await?;
        self.index.insert(object.path.clone(), object.clone());

        Ok(true)
    }
}
