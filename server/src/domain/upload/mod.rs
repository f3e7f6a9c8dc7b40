//! Partition upload
//!
//! - `columnar` - Canonical column-wise object encoding and fingerprints
//! - `uploader` - Retried, ledgered writes to the object store

pub mod columnar;
pub mod uploader;

pub use columnar::{ColumnarError, EncodedPartition, decode_partition, encode_partition};
pub use uploader::{UploadError, UploadOutcome, UploadStatsSnapshot, Uploader};
