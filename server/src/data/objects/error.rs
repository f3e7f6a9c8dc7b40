//! Object store error types

use thiserror::Error;

/// Errors from object store backends (filesystem/S3/memory)
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network, throttling or timeout; worth retrying
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Auth, missing bucket, invalid key; retrying will not help
    #[error("Permanent storage error: {0}")]
    Permanent(String),
}

impl ObjectStoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            ObjectStoreError::Transient(_) => true,
            ObjectStoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            ObjectStoreError::NotFound(_) | ObjectStoreError::Permanent(_) => false,
        }
    }
}
