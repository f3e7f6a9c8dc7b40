//! Cold-path metrics pipeline
//!
//! Rotated buffer files are grouped into (hour, entity) partitions, uploaded
//! once as content-addressed columnar objects, and folded into hourly and
//! daily rollups that a quality monitor checks for gaps, duplicates,
//! staleness and anomalies.

pub mod api;
mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
