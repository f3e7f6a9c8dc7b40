//! Partition building
//!
//! A partition is every record of one reporting entity within one UTC hour.
//! Partitions are the unit of upload, retry and rollup folding.

mod builder;
mod key;

pub use builder::{BuildReport, PartitionBuilder, group};
pub use key::{PartitionKey, escape_entity, parse_object_path, unescape_entity};

use crate::domain::records::MetricRecord;

/// Records sharing one partition key
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub key: PartitionKey,
    pub records: Vec<MetricRecord>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
