//! Streaming file -> partitions grouping

use std::collections::HashMap;
use std::path::Path;

use tokio::fs::File;

use super::{Partition, PartitionKey};
use crate::domain::records::{MetricRecord, RecordFormat, RecordReader};

/// Outcome counters of one built file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub records: u64,
    pub malformed: u64,
    pub partitions: usize,
}

/// Decodes rotated files in bounded batches and groups records by key
#[derive(Debug, Clone)]
pub struct PartitionBuilder {
    format: RecordFormat,
    batch_size: usize,
}

impl PartitionBuilder {
    pub fn new(format: RecordFormat, batch_size: usize) -> Self {
        Self {
            format,
            batch_size: batch_size.max(1),
        }
    }

    /// Build every partition of one file.
    ///
    /// Only I/O errors fail the whole file. Malformed records are counted in
    /// the report and skipped.
    pub async fn build_from_file(
        &self,
        path: &Path,
    ) -> std::io::Result<(Vec<Partition>, BuildReport)> {
        let file = File::open(path).await?;
        let mut reader = RecordReader::new(file, self.format);
        let mut groups: HashMap<PartitionKey, Vec<MetricRecord>> = HashMap::new();
        let mut report = BuildReport::default();

        while let Some(batch) = reader.next_batch(self.batch_size).await? {
            let decoded = batch.records.len() as u64;
            let rejected = group_into(&mut groups, batch.records);
            report.records += decoded - rejected;
            report.malformed += batch.malformed + rejected;
        }

        let partitions = finish(groups);
        report.partitions = partitions.len();

        if report.malformed > 0 {
            tracing::warn!(
                path = %path.display(),
                malformed = report.malformed,
                records = report.records,
                "Skipped malformed records"
            );
        }
        tracing::debug!(
            path = %path.display(),
            records = report.records,
            partitions = report.partitions,
            "Built partitions"
        );

        Ok((partitions, report))
    }
}

/// Group records into partitions sorted by key
pub fn group(records: impl IntoIterator<Item = MetricRecord>) -> Vec<Partition> {
    let mut groups = HashMap::new();
    group_into(&mut groups, records);
    finish(groups)
}

/// Returns the number of records whose key could not be derived
fn group_into(
    groups: &mut HashMap<PartitionKey, Vec<MetricRecord>>,
    records: impl IntoIterator<Item = MetricRecord>,
) -> u64 {
    let mut rejected = 0;
    for record in records {
        match PartitionKey::of(&record) {
            Some(key) => groups.entry(key).or_default().push(record),
            None => rejected += 1,
        }
    }
    rejected
}

fn finish(groups: HashMap<PartitionKey, Vec<MetricRecord>>) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = groups
        .into_iter()
        .map(|(key, records)| Partition { key, records })
        .collect();
    partitions.sort_by(|a, b| a.key.cmp(&b.key));
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::{MetricKind, encode_length_delimited, encode_ndjson};
    use crate::utils::time::HOUR_MS;
    use tempfile::TempDir;

    // 2024-01-01T00:00:00Z
    const T0: i64 = 1_704_067_200_000;

    fn record(ts: i64, entity: &str, value: f64) -> MetricRecord {
        MetricRecord {
            timestamp: ts,
            metric_name: "cpu".to_string(),
            value,
            metric_kind: MetricKind::Gauge,
            labels: Default::default(),
            reporting_entity_id: entity.to_string(),
        }
    }

    #[test]
    fn test_group_by_hour_and_entity() {
        let partitions = group(vec![
            record(T0 + 10, "a", 1.0),
            record(T0 + HOUR_MS + 5, "a", 2.0),
            record(T0 + 20, "b", 3.0),
            record(T0 + 30, "a", 4.0),
        ]);
        assert_eq!(partitions.len(), 3);
        for p in &partitions {
            assert!(
                p.records
                    .iter()
                    .all(|r| PartitionKey::of(r).as_ref() == Some(&p.key))
            );
        }
        let total: usize = partitions.iter().map(Partition::len).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_group_is_order_independent() {
        let records = vec![
            record(T0 + 1, "a", 1.0),
            record(T0 + 2, "b", 2.0),
            record(T0 + HOUR_MS, "a", 3.0),
        ];
        let mut reversed = records.clone();
        reversed.reverse();

        let keys = |ps: Vec<Partition>| ps.into_iter().map(|p| p.key).collect::<Vec<_>>();
        assert_eq!(keys(group(records)), keys(group(reversed)));
    }

    #[tokio::test]
    async fn test_build_file_spanning_hour_boundary() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("metrics.0001");
        let records = vec![
            record(T0 + HOUR_MS - 1, "a", 1.0),
            record(T0 + HOUR_MS, "a", 2.0),
        ];
        tokio::fs::write(&path, encode_ndjson(&records).unwrap())
            .await
            .unwrap();

        let builder = PartitionBuilder::new(RecordFormat::Ndjson, 1);
        let (partitions, report) = builder.build_from_file(&path).await.unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].key.hour, 0);
        assert_eq!(partitions[1].key.hour, 1);
        assert_eq!(
            report,
            BuildReport {
                records: 2,
                malformed: 0,
                partitions: 2
            }
        );
    }

    #[tokio::test]
    async fn test_build_skips_malformed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("metrics.0002");
        let mut data = encode_ndjson(&[record(T0, "a", 1.0)]).unwrap();
        data.extend_from_slice(b"{not json}\n");
        data.extend_from_slice(&encode_ndjson(&[record(T0 + 1, "a", 2.0)]).unwrap());
        tokio::fs::write(&path, data).await.unwrap();

        let builder = PartitionBuilder::new(RecordFormat::Ndjson, 16);
        let (partitions, report) = builder.build_from_file(&path).await.unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].len(), 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.records, 2);
    }

    #[tokio::test]
    async fn test_build_length_delimited() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("metrics.0003");
        let records = vec![record(T0, "a", 1.0), record(T0, "b", 2.0)];
        tokio::fs::write(&path, encode_length_delimited(&records).unwrap())
            .await
            .unwrap();

        let builder = PartitionBuilder::new(RecordFormat::LengthDelimited, 1);
        let (partitions, report) = builder.build_from_file(&path).await.unwrap();
        assert_eq!(partitions.len(), 2);
        assert_eq!(report.records, 2);
    }

    #[tokio::test]
    async fn test_build_missing_file_is_io_error() {
        let builder = PartitionBuilder::new(RecordFormat::Ndjson, 16);
        assert!(
            builder
                .build_from_file(Path::new("/nonexistent/metrics.0001"))
                .await
                .is_err()
        );
    }
}
