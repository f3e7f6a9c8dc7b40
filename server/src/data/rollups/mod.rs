//! Rollup row storage
//!
//! - `store` - `AggregateStore` trait, fold/replace outcomes and scan filters
//! - `memory` - `DashMap`-backed implementation

pub mod memory;
pub mod store;

pub use memory::MemoryAggregateStore;
pub use store::{
    AggregateStore, DIMENSION_WILDCARD, FoldOutcome, ReplaceOutcome, RollupFilter,
};
