//! Partition keys and object paths

use std::fmt;

use chrono::{Datelike, TimeZone, Timelike, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::domain::records::MetricRecord;
use crate::utils::crypto::is_sha256_hex;
use crate::utils::time::{HOUR_MS, hour_start, millis_to_datetime};

/// `(year, month, day, hour, reporting_entity_id)` of a record.
///
/// A pure function of the record's timestamp and entity: the file a record
/// arrived in, and when, play no part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub entity: String,
}

impl PartitionKey {
    /// Key for a timestamp (ms, UTC) and entity; `None` if the timestamp is
    /// out of chrono's range
    pub fn new(timestamp: i64, entity: &str) -> Option<Self> {
        let dt = millis_to_datetime(timestamp)?;
        Some(Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            entity: entity.to_string(),
        })
    }

    pub fn of(record: &MetricRecord) -> Option<Self> {
        Self::new(record.timestamp, &record.reporting_entity_id)
    }

    /// Start of the key's hour in milliseconds
    pub fn hour_start_ms(&self) -> i64 {
        Utc.with_ymd_and_hms(self.year, self.month, self.day, self.hour, 0, 0)
            .single()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| {
                tracing::warn!(key = %self, "Partition key does not name a valid hour");
                0
            })
    }

    pub fn hour_end_ms(&self) -> i64 {
        self.hour_start_ms() + HOUR_MS
    }

    /// True if `timestamp` falls into this key's hour
    pub fn contains(&self, timestamp: i64) -> bool {
        hour_start(timestamp) == self.hour_start_ms()
    }

    /// Object key prefix of this partition: `prefix/year=.../entity=...`
    pub fn object_dir(&self, prefix: &str) -> String {
        let dir = format!(
            "year={:04}/month={:02}/day={:02}/hour={:02}/entity={}",
            self.year,
            self.month,
            self.day,
            self.hour,
            escape_entity(&self.entity)
        );
        if prefix.is_empty() {
            dir
        } else {
            format!("{}/{}", prefix, dir)
        }
    }

    /// Deterministic object key for one content fingerprint
    pub fn object_path(&self, prefix: &str, fingerprint: &str, extension: &str) -> String {
        format!("{}/{}.{}", self.object_dir(prefix), fingerprint, extension)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}/{}",
            self.year, self.month, self.day, self.hour, self.entity
        )
    }
}

/// Parse an object key written by `PartitionKey::object_path` back into the
/// partition key and fingerprint. Returns `None` for anything else.
pub fn parse_object_path(path: &str, prefix: &str, extension: &str) -> Option<(PartitionKey, String)> {
    let rest = if prefix.is_empty() {
        path
    } else {
        path.strip_prefix(prefix)?.strip_prefix('/')?
    };

    let mut parts = rest.split('/');
    let year = parts.next()?.strip_prefix("year=")?.parse().ok()?;
    let month = parts.next()?.strip_prefix("month=")?.parse().ok()?;
    let day = parts.next()?.strip_prefix("day=")?.parse().ok()?;
    let hour = parts.next()?.strip_prefix("hour=")?.parse().ok()?;
    let entity = unescape_entity(parts.next()?.strip_prefix("entity=")?)?;
    let file = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let fingerprint = file.strip_suffix(extension)?.strip_suffix('.')?;
    if !is_sha256_hex(fingerprint) {
        return None;
    }

    let key = PartitionKey {
        year,
        month,
        day,
        hour,
        entity,
    };
    // Reject impossible dates such as month=13
    Utc.with_ymd_and_hms(key.year, key.month, key.day, key.hour, 0, 0)
        .single()?;

    Some((key, fingerprint.to_string()))
}

/// Everything outside `[A-Za-z0-9._-]`
const ENTITY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'_').remove(b'-');

/// Percent-escape an entity id so it is a single safe path segment.
/// A leading dot is escaped too, so `.` and `..` never appear as segments.
pub fn escape_entity(entity: &str) -> String {
    match entity.strip_prefix('.') {
        Some(rest) => format!("%2E{}", utf8_percent_encode(rest, ENTITY_ESCAPE)),
        None => utf8_percent_encode(entity, ENTITY_ESCAPE).to_string(),
    }
}

/// Inverse of `escape_entity`; `None` unless `segment` is exactly what
/// `escape_entity` would have produced
pub fn unescape_entity(segment: &str) -> Option<String> {
    let entity = percent_decode_str(segment).decode_utf8().ok()?.into_owned();
    (escape_entity(&entity) == segment).then_some(entity)
}
