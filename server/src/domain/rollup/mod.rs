//! Hourly and daily rollups
//!
//! - `sketch` - Mergeable relative-error quantile sketch
//! - `state` - Rollup keys, mergeable aggregates, rows and the fold set
//! - `tier` - Tier widths, retention and lateness windows
//! - `engine` - Folding, daily re-derivation, lifecycle sweep, snapshots
//!
//! Row lifecycle per tier: no row (EMPTY) -> ACCUMULATING -> FINALIZABLE
//! (bucket end + grace passed) -> removed (EXPIRED, bucket end + TTL passed).
//! A late partition folded into a FINALIZABLE row moves it back to
//! ACCUMULATING.

pub mod engine;
pub mod sketch;
pub mod state;
pub mod tier;

pub use engine::{
    CatchUpReport, FoldResult, RollupEngine, RollupError, RollupStatsSnapshot, RollupView,
    SweepReport,
};
pub use sketch::QuantileSketch;
pub use state::{Aggregate, BucketState, FoldRecord, FoldSet, RollupKey, RollupRow};
pub use tier::{Tier, TierSpec};
