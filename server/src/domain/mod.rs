//! Cold-path pipeline domain logic
//!
//! - `records` - metric record model and buffer file codecs
//! - `partition` - (hour, entity) grouping of rotated files
//! - `upload` - columnar encoding and idempotent object upload
//! - `watcher` - detection of rotated buffer files
//! - `rollup` - hourly/daily aggregates with quantile sketches
//! - `quality` - gap, duplicate, freshness and anomaly checks
//! - `pipeline` - stage wiring over bounded queues

pub mod partition;
pub mod pipeline;
pub mod quality;
pub mod records;
pub mod rollup;
pub mod upload;
pub mod watcher;

pub use pipeline::{Pipeline, PipelineError, PipelineStats, PipelineStatsSnapshot, probe_store};
pub use quality::QualityMonitor;
pub use rollup::RollupEngine;
pub use watcher::BufferWatcher;
