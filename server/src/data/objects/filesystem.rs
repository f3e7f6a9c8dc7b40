//! Filesystem-based object store implementation
//!
//! Object keys map directly onto relative paths under `base_path`; each write
//! goes to a staging file that is renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::error::ObjectStoreError;
use super::storage::{ObjectStore, validate_key};
use crate::utils::file::{is_hidden_or_staging, write_atomic};

/// Name of the marker written by `probe`
const PROBE_FILE: &str = ".probe";

/// Filesystem-based object store
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    /// Root directory of all objects
    base_path: PathBuf,
}

impl FilesystemObjectStore {
    /// Create a new filesystem store rooted at `base_path`
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the full path for an object key
    fn object_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.base_path.clone(), |path, segment| path.join(segment))
    }

    /// Convert a path under `base_path` back into a `/`-separated key
    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        segments.map(|s| s.join("/"))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        let path = self.object_path(key);
        write_atomic(&path, data).await?;

        tracing::debug!(
            key,
            size = data.len(),
            path = %path.display(),
            "Object stored"
        );

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        validate_key(key)?;
        let path = self.object_path(key);

        // Read directly and map ENOENT instead of checking existence first
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::Io(e)
            }
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        validate_key(key)?;
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if is_hidden_or_staging(&path) {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file()
                    && let Some(key) = self.key_for(&path)
                    && key.starts_with(prefix)
                {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn probe(&self) -> Result<(), ObjectStoreError> {
        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            ObjectStoreError::Permanent(format!(
                "Cannot create object directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let marker = self.base_path.join(PROBE_FILE);
        write_atomic(&marker, b"ok").await.map_err(|e| {
            ObjectStoreError::Permanent(format!(
                "Object directory {} is not writable: {}",
                self.base_path.display(),
                e
            ))
        })?;
        fs::remove_file(&marker).await.ok();

        tracing::debug!(path = %self.base_path.display(), "Filesystem object store reachable");
        Ok(())
    }
}
