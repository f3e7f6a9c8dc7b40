//! Durable state
//!
//! - `objects` - object store backends holding partition objects
//! - `ledger` - append-only log of confirmed uploads
//! - `rollups` - aggregate row storage behind the rollup engine

pub mod ledger;
pub mod objects;
pub mod rollups;

pub use ledger::{Ledger, LedgerError, UploadedObject};
pub use objects::{ObjectStore, ObjectStoreError, create_object_store};
pub use rollups::{AggregateStore, MemoryAggregateStore, RollupFilter};
