//! In-memory aggregate store
//!
//! `DashMap` shard locks give single-writer-per-key: a fold holds the write
//! guard of its key's shard for the whole read-merge-write.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::store::{AggregateStore, FoldOutcome, ReplaceOutcome, RollupFilter};
use crate::domain::rollup::{Aggregate, BucketState, RollupKey, RollupRow};

#[derive(Debug, Default)]
pub struct MemoryAggregateStore {
    rows: DashMap<RollupKey, RollupRow>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut rows: Vec<(RollupKey, RollupRow)>) -> Vec<(RollupKey, RollupRow)> {
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows
}

impl AggregateStore for MemoryAggregateStore {
    fn fold(&self, key: &RollupKey, fingerprint: &str, delta: &Aggregate, now: i64) -> FoldOutcome {
        let mut row = self
            .rows
            .entry(key.clone())
            .or_insert_with(|| RollupRow::new(now));

        if row.fingerprints.contains(fingerprint) {
            return FoldOutcome::Duplicate;
        }

        row.agg.merge(delta);
        row.fingerprints.insert(fingerprint.to_string());
        row.updated_at = now;
        let reopened = row.state == BucketState::Finalizable;
        row.state = BucketState::Accumulating;

        FoldOutcome::Applied { reopened }
    }

    fn query(&self, key: &RollupKey) -> Option<RollupRow> {
        self.rows.get(key).map(|r| r.value().clone())
    }

    fn scan(&self, filter: &RollupFilter) -> Vec<(RollupKey, RollupRow)> {
        sorted(
            self.rows
                .iter()
                .filter(|e| filter.matches(e.key()))
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        )
    }

    fn rows(&self) -> Vec<(RollupKey, RollupRow)> {
        sorted(
            self.rows
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        )
    }

    fn insert(&self, key: RollupKey, row: RollupRow) {
        self.rows.insert(key, row);
    }

    fn remove(&self, key: &RollupKey) -> Option<RollupRow> {
        self.rows.remove(key).map(|(_, row)| row)
    }

    fn replace_if_newer(&self, key: &RollupKey, row: RollupRow) -> ReplaceOutcome {
        match self.rows.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(row);
                ReplaceOutcome::Replaced
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if current.fingerprints == row.fingerprints {
                    ReplaceOutcome::Current
                } else if current.fingerprints.is_subset(&row.fingerprints) {
                    slot.insert(row);
                    ReplaceOutcome::Replaced
                } else if current.fingerprints.is_superset(&row.fingerprints) {
                    ReplaceOutcome::Current
                } else {
                    ReplaceOutcome::Conflict
                }
            }
        }
    }

    fn mark_finalizable(&self, key: &RollupKey) -> bool {
        match self.rows.get_mut(key) {
            Some(mut row) if row.state == BucketState::Accumulating => {
                row.state = BucketState::Finalizable;
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}
