//! Object store trait definition
//!
//! Defines the interface for partition object backends (filesystem, S3, memory)

use async_trait::async_trait;

use super::error::ObjectStoreError;

/// Trait for object storage backends
///
/// All implementations must be thread-safe (Send + Sync) for use in async contexts.
/// Keys are `/`-separated relative paths such as
/// `metrics/year=2024/month=01/day=01/hour=00/entity=api-1/<fingerprint>.parquet`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend_name(&self) -> &'static str;

    /// Store an object, replacing any object under the same key
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), ObjectStoreError>;

    /// Retrieve an object, or `NotFound`
    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;

    /// Check if an object exists
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;

    /// List keys starting with `prefix`, in lexicographic order
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    /// Verify the backend is reachable and writable with the configured credentials
    async fn probe(&self) -> Result<(), ObjectStoreError>;
}

/// Reject keys that could escape the store root or are not normalized
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(ObjectStoreError::Permanent(format!("Invalid object key: '{}'", key)));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\'))
    {
        return Err(ObjectStoreError::Permanent(format!("Invalid object key: '{}'", key)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("metrics/year=2024/a.parquet").is_ok());
        assert!(validate_key("a.parquet").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("dir/").is_err());
    }
}
