//! Buffer rotation watcher
//!
//! Polls the buffer directory for rotated files (anything but the active
//! file, dot-files and staging leftovers) and hands each to the pipeline as a
//! `FileJob`. The pipeline answers on the job's ack channel once every
//! partition of the file is durably stored: `true` deletes the file, `false`
//! (or a dropped ack) leaves it for the next rescan.
//!
//! A newly appeared file is submitted on the next poll or rotation hint. The
//! periodic rescan resubmits every file not currently in flight, which is
//! what recovers files left behind by a crash or a failed upload.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::{Future, StreamExt};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::pipeline::PipelineStats;
use crate::core::config::BufferConfig;
use crate::utils::file::is_hidden_or_staging;

/// One rotated file handed to the pipeline
#[derive(Debug)]
pub struct FileJob {
    pub path: PathBuf,
    /// `true` once every partition of the file is stored
    pub ack: oneshot::Sender<bool>,
}

type AckFuture = Pin<Box<dyn Future<Output = (PathBuf, bool)> + Send>>;

pub struct BufferWatcher {
    dir: PathBuf,
    active_file: String,
    poll_interval: Duration,
    rescan_interval: Duration,
    rotation: Arc<Notify>,
    stats: Arc<PipelineStats>,
}

impl BufferWatcher {
    /// `rotation` is notified by whoever knows a file was just rotated;
    /// it only shortens the wait until the next poll.
    pub fn new(config: &BufferConfig, stats: Arc<PipelineStats>, rotation: Arc<Notify>) -> Self {
        Self {
            dir: config.dir.clone(),
            active_file: config.active_file.clone(),
            poll_interval: config.poll_interval,
            rescan_interval: config.rescan_interval,
            rotation,
            stats,
        }
    }

    /// Rotated files currently in the buffer directory, sorted by name
    pub async fn scan(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if self.is_candidate(&path) && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn is_candidate(&self, path: &Path) -> bool {
        !is_hidden_or_staging(path)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name != self.active_file)
    }

    pub fn start(
        self,
        jobs: mpsc::Sender<FileJob>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut known: HashSet<PathBuf> = HashSet::new();
            let mut in_flight: HashSet<PathBuf> = HashSet::new();
            let mut acks: FuturesUnordered<AckFuture> = FuturesUnordered::new();

            let mut poll_tick = tokio::time::interval(self.poll_interval);
            let mut rescan_tick = tokio::time::interval(self.rescan_interval);
            poll_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            rescan_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first rescan tick fires immediately and picks up leftovers
            poll_tick.tick().await;

            tracing::debug!(dir = %self.dir.display(), active = %self.active_file, "Buffer watcher started");

            loop {
                let rescan = tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::debug!("Buffer watcher received shutdown, draining...");
                            break;
                        }
                        continue;
                    }
                    Some((path, ok)) = acks.next(), if !acks.is_empty() => {
                        in_flight.remove(&path);
                        self.settle(&path, ok, &mut known).await;
                        continue;
                    }
                    _ = rescan_tick.tick() => true,
                    _ = poll_tick.tick() => false,
                    _ = self.rotation.notified() => false,
                };

                let files = match self.scan().await {
                    Ok(files) => files,
                    Err(e) => {
                        tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to scan buffer directory");
                        continue;
                    }
                };

                let mut submitted = 0usize;
                for path in &files {
                    if in_flight.contains(path) || (!rescan && known.contains(path)) {
                        continue;
                    }
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let job = FileJob {
                        path: path.clone(),
                        ack: ack_tx,
                    };
                    if jobs.send(job).await.is_err() {
                        tracing::warn!("Pipeline closed, buffer watcher stopping");
                        return;
                    }
                    in_flight.insert(path.clone());
                    let path = path.clone();
                    acks.push(Box::pin(async move { (path, ack_rx.await.unwrap_or(false)) }));
                    submitted += 1;
                }
                known = files.into_iter().collect();

                if submitted > 0 {
                    self.stats.add_files_submitted(submitted as u64);
                    tracing::debug!(submitted, rescan, in_flight = in_flight.len(), "Submitted buffer files");
                }
            }

            // Close the queue so downstream stages drain, then collect their verdicts
            drop(jobs);
            while let Some((path, ok)) = acks.next().await {
                self.settle(&path, ok, &mut known).await;
            }
            tracing::debug!("Buffer watcher shutdown complete");
        })
    }

    async fn settle(&self, path: &Path, ok: bool, known: &mut HashSet<PathBuf>) {
        if !ok {
            self.stats.add_files_retained(1);
            tracing::warn!(path = %path.display(), "Buffer file kept for retry");
            return;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                known.remove(path);
                self.stats.add_files_completed(1);
                tracing::debug!(path = %path.display(), "Buffer file processed and removed");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                known.remove(path);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to remove processed buffer file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::RecordFormat;
    use tempfile::TempDir;

    fn config(dir: &Path) -> BufferConfig {
        BufferConfig {
            dir: dir.to_path_buf(),
            active_file: "metrics.active".to_string(),
            format: RecordFormat::Ndjson,
            poll_interval: Duration::from_millis(20),
            rescan_interval: Duration::from_millis(200),
            decode_batch_size: 16,
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<FileJob>) -> FileJob {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_excludes_active_hidden_and_staging() {
        let temp = TempDir::new().unwrap();
        for name in ["metrics.active", ".lock", "metrics.0002.tmp", "metrics.0001", "metrics.0000"] {
            tokio::fs::write(temp.path().join(name), b"").await.unwrap();
        }
        tokio::fs::create_dir(temp.path().join("subdir")).await.unwrap();

        let watcher = BufferWatcher::new(
            &config(temp.path()),
            Arc::new(PipelineStats::default()),
            Arc::new(Notify::new()),
        );
        let files = watcher.scan().await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["metrics.0000", "metrics.0001"]);
    }

    #[tokio::test]
    async fn test_scan_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let watcher = BufferWatcher::new(
            &config(&temp.path().join("missing")),
            Arc::new(PipelineStats::default()),
            Arc::new(Notify::new()),
        );
        assert!(watcher.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ack_true_deletes_and_false_retries_on_rescan() {
        let temp = TempDir::new().unwrap();
        let stats = Arc::new(PipelineStats::default());
        let watcher = BufferWatcher::new(&config(temp.path()), stats.clone(), Arc::new(Notify::new()));
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ok_file = temp.path().join("metrics.0001");
        let bad_file = temp.path().join("metrics.0002");
        tokio::fs::write(&ok_file, b"a").await.unwrap();
        tokio::fs::write(&bad_file, b"b").await.unwrap();
        tokio::fs::write(temp.path().join("metrics.active"), b"c").await.unwrap();

        let handle = watcher.start(tx, shutdown_rx);

        let first = recv(&mut rx).await;
        let second = recv(&mut rx).await;
        assert_eq!(first.path, ok_file);
        assert_eq!(second.path, bad_file);
        first.ack.send(true).unwrap();
        second.ack.send(false).unwrap();

        // The failed file comes back with the next rescan
        let retry = recv(&mut rx).await;
        assert_eq!(retry.path, bad_file);
        assert!(!ok_file.exists());
        assert!(bad_file.exists());
        retry.ack.send(true).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!bad_file.exists());
        assert!(temp.path().join("metrics.active").exists());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.files_completed, 2);
        assert_eq!(snapshot.files_retained, 1);
    }

    #[tokio::test]
    async fn test_new_file_picked_up_by_poll() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(temp.path());
        cfg.rescan_interval = Duration::from_secs(3600);
        let rotation = Arc::new(Notify::new());
        let watcher = BufferWatcher::new(&cfg, Arc::new(PipelineStats::default()), rotation.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = watcher.start(tx, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let path = temp.path().join("metrics.0009");
        tokio::fs::write(&path, b"x").await.unwrap();
        rotation.notify_one();

        let job = recv(&mut rx).await;
        assert_eq!(job.path, path);
        drop(job);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        // Dropped ack keeps the file
        assert!(path.exists());
    }
}
