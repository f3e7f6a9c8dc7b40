//! Columnar partition objects
//!
//! A partition is written as a single Parquet file. Rows are laid out in
//! canonical order, so string columns compress well under Parquet's
//! dictionary pages. The partition key travels in the file's key-value
//! metadata; label sets are stored as their JSON object form.

use std::sync::Arc;

use arrow::array::{Array, Float64Array, Int64Array, StringArray, UInt8Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use thiserror::Error;

use crate::domain::partition::{Partition, PartitionKey};
use crate::domain::records::{CodecError, Labels, MetricKind, MetricRecord};
use crate::utils::crypto::ChunkHasher;

/// Current object layout version
pub const COLUMNAR_VERSION: u8 = 2;

const META_VERSION: &str = "coldpath.version";
const META_PARTITION: &str = "coldpath.partition";

#[derive(Debug, Error)]
pub enum ColumnarError {
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Record error: {0}")]
    Record(#[from] CodecError),

    #[error("Unsupported object version {0}")]
    Version(String),

    #[error("Corrupt object: {0}")]
    Corrupt(String),
}

/// A partition ready to upload
#[derive(Debug, Clone)]
pub struct EncodedPartition {
    pub key: PartitionKey,
    pub fingerprint: String,
    pub bytes: Vec<u8>,
    pub record_count: u64,
}

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Int64, false),
        Field::new("metric_name", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
        Field::new("metric_kind", DataType::UInt8, false),
        Field::new("labels", DataType::Utf8, false),
    ]))
}

/// Sort a partition canonically and fingerprint it
pub fn fingerprint(records: &mut [MetricRecord]) -> Result<String, ColumnarError> {
    records.sort_by(|a, b| a.canonical_cmp(b));
    let mut hasher = ChunkHasher::new();
    for record in records.iter() {
        hasher.update(&record.canonical_bytes()?);
    }
    Ok(hasher.finish_hex())
}

/// Serialize a partition into its Parquet object
pub fn encode_partition(partition: &Partition) -> Result<EncodedPartition, ColumnarError> {
    let mut records = partition.records.clone();
    let fingerprint = fingerprint(&mut records)?;

    let labels = records
        .iter()
        .map(|r| serde_json::to_string(&r.labels))
        .collect::<Result<Vec<_>, _>>()?;

    let schema = schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.timestamp))),
            Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.metric_name.as_str()))),
            Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.value))),
            Arc::new(UInt8Array::from_iter_values(records.iter().map(|r| r.metric_kind.as_u8()))),
            Arc::new(StringArray::from_iter_values(labels.iter().map(String::as_str))),
        ],
    )?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![
            KeyValue::new(META_VERSION.to_string(), COLUMNAR_VERSION.to_string()),
            KeyValue::new(META_PARTITION.to_string(), serde_json::to_string(&partition.key)?),
        ]))
        .build();

    let mut bytes = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut bytes, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(EncodedPartition {
        key: partition.key.clone(),
        fingerprint,
        bytes,
        record_count: records.len() as u64,
    })
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, ColumnarError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| ColumnarError::Corrupt(format!("missing or mistyped column {}", name)))
}

/// Decode a Parquet object back into its partition
pub fn decode_partition(bytes: &[u8]) -> Result<Partition, ColumnarError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))?;

    let metadata = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .cloned()
        .unwrap_or_default();
    let lookup = |key: &str| {
        metadata
            .iter()
            .find(|kv| kv.key == key)
            .and_then(|kv| kv.value.clone())
    };

    let version = lookup(META_VERSION).unwrap_or_default();
    if version != COLUMNAR_VERSION.to_string() {
        return Err(ColumnarError::Version(version));
    }
    let key: PartitionKey = match lookup(META_PARTITION) {
        Some(raw) => serde_json::from_str(&raw)?,
        None => return Err(ColumnarError::Corrupt("missing partition key".to_string())),
    };

    let mut records = Vec::new();
    for batch in builder.build()? {
        let batch = batch?;
        let timestamps = column::<Int64Array>(&batch, "timestamp")?;
        let names = column::<StringArray>(&batch, "metric_name")?;
        let values = column::<Float64Array>(&batch, "value")?;
        let kinds = column::<UInt8Array>(&batch, "metric_kind")?;
        let labels = column::<StringArray>(&batch, "labels")?;

        for i in 0..batch.num_rows() {
            let metric_kind = MetricKind::from_u8(kinds.value(i))
                .ok_or_else(|| ColumnarError::Corrupt(format!("unknown kind at row {}", i)))?;
            let labels: Labels = serde_json::from_str(labels.value(i))?;
            let record = MetricRecord {
                timestamp: timestamps.value(i),
                metric_name: names.value(i).to_string(),
                value: values.value(i),
                metric_kind,
                labels,
                reporting_entity_id: key.entity.clone(),
            };
            if !key.contains(record.timestamp) {
                return Err(ColumnarError::Corrupt(format!(
                    "row {} outside partition {}",
                    records.len(),
                    key
                )));
            }
            records.push(record);
        }
    }

    Ok(Partition { key, records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::partition::group;

    const T0: i64 = 1_704_067_200_000;

    fn record(offset: i64, name: &str, value: f64, route: &str) -> MetricRecord {
        MetricRecord {
            timestamp: T0 + offset,
            metric_name: name.to_string(),
            value,
            metric_kind: MetricKind::HistogramPoint,
            labels: [("route", route)].into_iter().collect(),
            reporting_entity_id: "api-1".to_string(),
        }
    }

    fn partition(records: Vec<MetricRecord>) -> Partition {
        group(records).into_iter().next().unwrap()
    }

    #[test]
    fn test_encode_decode_preserves_records() {
        let p = partition(vec![
            record(3, "latency", 12.5, "/a"),
            record(1, "latency", 7.0, "/b"),
            record(2, "errors", 1.0, "/a"),
        ]);
        let encoded = encode_partition(&p).unwrap();
        assert_eq!(encoded.record_count, 3);
        assert_eq!(&encoded.bytes[..4], b"PAR1");

        let decoded = decode_partition(&encoded.bytes).unwrap();
        assert_eq!(decoded.key, p.key);
        let mut expected = p.records.clone();
        expected.sort_by(|a, b| a.canonical_cmp(b));
        assert_eq!(decoded.records, expected);
    }

    #[test]
    fn test_encoding_is_order_independent() {
        let a = partition(vec![record(1, "m", 1.0, "/a"), record(2, "m", 2.0, "/b")]);
        let b = partition(vec![record(2, "m", 2.0, "/b"), record(1, "m", 1.0, "/a")]);
        let ea = encode_partition(&a).unwrap();
        let eb = encode_partition(&b).unwrap();
        assert_eq!(ea.fingerprint, eb.fingerprint);
        assert_eq!(
            decode_partition(&ea.bytes).unwrap().records,
            decode_partition(&eb.bytes).unwrap().records
        );
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = partition(vec![record(1, "m", 1.0, "/a")]);
        let b = partition(vec![record(1, "m", 1.5, "/a")]);
        assert_ne!(
            encode_partition(&a).unwrap().fingerprint,
            encode_partition(&b).unwrap().fingerprint
        );
    }

    #[test]
    fn test_parquet_layout() {
        let p = partition(vec![
            record(1, "m", 1.0, "/a"),
            record(2, "m", 2.0, "/a"),
            record(3, "n", 3.0, "/b"),
        ]);
        let encoded = encode_partition(&p).unwrap();
        let builder =
            ParquetRecordBatchReaderBuilder::try_new(Bytes::from(encoded.bytes.clone())).unwrap();
        let fields: Vec<_> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(
            fields,
            vec!["timestamp", "metric_name", "value", "metric_kind", "labels"]
        );
        assert_eq!(builder.metadata().file_metadata().num_rows(), 3);

        let batch = builder.build().unwrap().next().unwrap().unwrap();
        let labels = column::<StringArray>(&batch, "labels").unwrap();
        assert_eq!(labels.value(0), r#"{"route":"/a"}"#);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_partition(b"not parquet"),
            Err(ColumnarError::Parquet(_))
        ));
    }
}
