//! Staleness of reporting entities

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::rollup::{RollupKey, RollupRow, Tier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreshnessFinding {
    pub entity: String,
    /// Start of the newest hourly bucket, if any
    pub last_bucket_start: Option<i64>,
    /// Time since that bucket ended, ms
    pub lag_ms: Option<i64>,
    pub stale: bool,
}

/// Lag of every entity; an entity without rows is stale
pub fn check_freshness(
    rows: &[(RollupKey, RollupRow)],
    entities: &[String],
    staleness_ms: i64,
    now: i64,
) -> Vec<FreshnessFinding> {
    let mut latest: BTreeMap<&str, Option<i64>> =
        entities.iter().map(|e| (e.as_str(), None)).collect();
    for (key, _) in rows.iter().filter(|(k, _)| k.tier == Tier::Hourly) {
        if let Some(slot) = latest.get_mut(key.entity.as_str()) {
            *slot = Some(slot.map_or(key.bucket_start, |b| b.max(key.bucket_start)));
        }
    }

    latest
        .into_iter()
        .map(|(entity, last)| {
            let lag_ms = last.map(|b| (now - (b + Tier::Hourly.width_ms())).max(0));
            FreshnessFinding {
                entity: entity.to_string(),
                last_bucket_start: last,
                lag_ms,
                stale: lag_ms.is_none_or(|lag| lag > staleness_ms),
            }
        })
        .collect()
}
