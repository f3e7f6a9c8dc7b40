//! Object storage layer
//!
//! Durable home of uploaded partitions. Objects are content-addressed: the
//! key embeds the partition key and a fingerprint of the partition content,
//! so writing the same partition twice lands on the same key.
//!
//! ## Architecture
//!
//! - `storage` - Trait definition for object store backends
//! - `filesystem` - Local filesystem implementation
//! - `s3` - S3 / S3-compatible implementation
//! - `memory` - In-memory implementation with fault injection
//! - `error` - Error types and transient/permanent classification
//!
//! ## Layout
//!
//! ```text
//! {prefix}/
//! └── year=YYYY/month=MM/day=DD/hour=HH/
//!     └── entity={escaped id}/
//!         └── {fingerprint}.parquet
//! ```

pub mod error;
pub mod filesystem;
pub mod memory;
pub mod s3;
pub mod storage;

use std::sync::Arc;

use crate::core::config::{ObjectBackend, UploadConfig};
use crate::core::storage::{AppStorage, DataSubdir};

pub use error::ObjectStoreError;
pub use filesystem::FilesystemObjectStore;
pub use memory::{InjectedFault, MemoryObjectStore};
pub use s3::S3ObjectStore;
pub use storage::ObjectStore;

/// Create the configured object store backend
///
/// This function is async because S3 initialization requires loading AWS config.
pub async fn create_object_store(
    config: &UploadConfig,
    app_storage: &AppStorage,
) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        ObjectBackend::S3 => {
            let s3_config = config.s3.as_ref().ok_or_else(|| {
                ObjectStoreError::Permanent(
                    "S3 backend configured but no s3 config provided (missing bucket)".to_string(),
                )
            })?;
            Arc::new(S3ObjectStore::new(s3_config).await?)
        }
        ObjectBackend::Filesystem => {
            let root = config
                .filesystem_path
                .as_ref()
                .map(|p| crate::utils::file::expand_path(p))
                .unwrap_or_else(|| app_storage.subdir(DataSubdir::Objects));
            Arc::new(FilesystemObjectStore::new(root))
        }
    };

    tracing::debug!(
        backend = store.backend_name(),
        prefix = %config.prefix,
        "Object store initialized"
    );

    Ok(store)
}
