//! Metric records and their file encodings

pub mod codec;
pub mod types;

pub use codec::{
    CodecError, DecodedBatch, RecordFormat, RecordReader, decode_frame, decode_json,
    encode_length_delimited, encode_ndjson,
};
pub use types::{Labels, MetricKind, MetricRecord};
