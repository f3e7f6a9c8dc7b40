//! File utility functions

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

/// Expand a path string to an absolute path.
///
/// Handles `~` / `~/path` via the home directory and resolves relative paths
/// (including bare names) against the current working directory. Absolute
/// paths pass through unchanged.
///
/// ```text
/// expand_path("~/.coldpath")  // -> /home/user/.coldpath
/// expand_path("./buffer")     // -> /current/dir/./buffer
/// expand_path("/var/spool")   // -> /var/spool
/// ```
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();

    if path.is_empty() {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }

    let expanded = if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
    } else if let Some(rest) = path.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    };

    if expanded.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    } else {
        expanded
    }
}

/// Write `data` to `path` atomically: write a sibling staging file, fsync it,
/// then rename over the destination.
///
/// The staging name includes the PID and a sub-second suffix so concurrent
/// writers of the same destination never share a staging file.
pub async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let staging = staging_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&staging).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&staging, path).await
    }
    .await;

    if result.is_err() {
        tokio::fs::remove_file(&staging).await.ok();
    }
    result
}

/// True for dot-files and editor/staging leftovers that must never be ingested
pub fn is_hidden_or_staging(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|name| name.starts_with('.') || name.ends_with(".tmp"))
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), suffix))
}
