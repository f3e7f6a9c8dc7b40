//! Metric record types

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::codec::CodecError;
use crate::utils::time::millis_to_datetime;

/// Kind of observed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    HistogramPoint,
}

impl MetricKind {
    pub const fn as_u8(self) -> u8 {
        match self {
            MetricKind::Counter => 0,
            MetricKind::Gauge => 1,
            MetricKind::HistogramPoint => 2,
        }
    }

    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MetricKind::Counter),
            1 => Some(MetricKind::Gauge),
            2 => Some(MetricKind::HistogramPoint),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::HistogramPoint => write!(f, "histogram_point"),
        }
    }
}

/// Label set with a defined iteration order.
///
/// Backed by a `BTreeMap`, so equality, hashing and serialization do not
/// depend on the order labels were inserted or decoded in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Keep only the given keys. Keys missing from the record are omitted,
    /// not filled with placeholders.
    pub fn project(&self, keys: &[String]) -> Labels {
        Labels(
            keys.iter()
                .filter_map(|k| self.0.get(k).map(|v| (k.clone(), v.clone())))
                .collect(),
        )
    }

    /// True if every pair of `filter` is present with the same value
    pub fn contains_all(&self, filter: &Labels) -> bool {
        filter.0.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Labels(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

/// One observed value from a reporting entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Milliseconds since Unix epoch, UTC
    pub timestamp: i64,
    pub metric_name: String,
    pub value: f64,
    pub metric_kind: MetricKind,
    #[serde(default)]
    pub labels: Labels,
    pub reporting_entity_id: String,
}

impl MetricRecord {
    /// Reject records that decode but cannot be partitioned or aggregated
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.metric_name.is_empty() {
            return Err(CodecError::Invalid("empty metric_name".to_string()));
        }
        if self.reporting_entity_id.is_empty() {
            return Err(CodecError::Invalid("empty reporting_entity_id".to_string()));
        }
        if !self.value.is_finite() {
            return Err(CodecError::Invalid(format!(
                "non-finite value for {}",
                self.metric_name
            )));
        }
        if millis_to_datetime(self.timestamp).is_none() {
            return Err(CodecError::Invalid(format!(
                "timestamp out of range: {}",
                self.timestamp
            )));
        }
        Ok(())
    }

    /// Deterministic byte encoding used for ordering-independent fingerprints
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Total order used to lay rows out canonically
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.metric_name.cmp(&other.metric_name))
            .then_with(|| self.labels.cmp(&other.labels))
            .then_with(|| self.metric_kind.cmp(&other.metric_kind))
            .then_with(|| self.value.total_cmp(&other.value))
            .then_with(|| self.reporting_entity_id.cmp(&other.reporting_entity_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: f64) -> MetricRecord {
        MetricRecord {
            timestamp: 1_704_067_200_000,
            metric_name: "http.latency_ms".to_string(),
            value,
            metric_kind: MetricKind::Gauge,
            labels: [("route", "/checkout"), ("method", "GET")].into_iter().collect(),
            reporting_entity_id: "api-1".to_string(),
        }
    }

    #[test]
    fn test_metric_kind_serde() {
        let kind: MetricKind = serde_json::from_str(r#""histogram_point""#).unwrap();
        assert_eq!(kind, MetricKind::HistogramPoint);
        assert_eq!(serde_json::to_string(&MetricKind::Counter).unwrap(), r#""counter""#);
    }

    #[test]
    fn test_metric_kind_u8_mapping() {
        for kind in [MetricKind::Counter, MetricKind::Gauge, MetricKind::HistogramPoint] {
            assert_eq!(MetricKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(MetricKind::from_u8(9), None);
    }

    #[test]
    fn test_labels_insertion_order_irrelevant() {
        let a: Labels = [("a", "1"), ("b", "2")].into_iter().collect();
        let b: Labels = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "{a=1,b=2}");
    }

    #[test]
    fn test_labels_project_and_contains() {
        let labels: Labels = [("route", "/x"), ("method", "GET"), ("zone", "eu")]
            .into_iter()
            .collect();
        let projected = labels.project(&["route".to_string(), "missing".to_string()]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get("route"), Some("/x"));

        let filter: Labels = [("method", "GET")].into_iter().collect();
        assert!(labels.contains_all(&filter));
        assert!(labels.contains_all(&Labels::new()));
        let wrong: Labels = [("method", "POST")].into_iter().collect();
        assert!(!labels.contains_all(&wrong));
    }

    #[test]
    fn test_validate_rejects_bad_records() {
        assert!(record(1.0).validate().is_ok());
        assert!(record(f64::NAN).validate().is_err());

        let mut r = record(1.0);
        r.reporting_entity_id.clear();
        assert!(r.validate().is_err());

        let mut r = record(1.0);
        r.timestamp = i64::MAX;
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_canonical_bytes_ignore_label_insertion_order() {
        let mut a = record(2.5);
        a.labels = [("x", "1"), ("y", "2")].into_iter().collect();
        let mut b = record(2.5);
        b.labels = [("y", "2"), ("x", "1")].into_iter().collect();
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn test_canonical_cmp_orders_by_timestamp_first() {
        let mut early = record(9.0);
        early.timestamp -= 1;
        assert_eq!(early.canonical_cmp(&record(1.0)), Ordering::Less);
        assert_eq!(record(1.0).canonical_cmp(&record(2.0)), Ordering::Less);
    }
}
