//! Record decoding for rotated metric files
//!
//! Two on-disk encodings are supported: newline-delimited JSON and
//! length-delimited MessagePack (4-byte big-endian length, then one
//! `rmp-serde` encoded record). A record that fails to decode or validate
//! is counted and skipped; the rest of the file still flows.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use super::types::MetricRecord;

/// Upper bound for a single length-delimited frame
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Encoding of a rotated metrics file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    #[default]
    Ndjson,
    #[serde(alias = "length-delimited")]
    LengthDelimited,
}

impl FromStr for RecordFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ndjson" | "jsonl" => Ok(RecordFormat::Ndjson),
            "length_delimited" | "length-delimited" | "msgpack" => {
                Ok(RecordFormat::LengthDelimited)
            }
            other => Err(format!(
                "unknown record format '{}': expected ndjson or length_delimited",
                other
            )),
        }
    }
}

/// Records decoded from one read window
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub records: Vec<MetricRecord>,
    pub malformed: u64,
}

/// Streaming reader that yields records in bounded batches
pub struct RecordReader<R> {
    inner: BufReader<R>,
    format: RecordFormat,
    line: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    pub fn new(reader: R, format: RecordFormat) -> Self {
        Self {
            inner: BufReader::new(reader),
            format,
            line: Vec::new(),
            finished: false,
        }
    }

    /// Decode up to `max` records. Returns `Ok(None)` once the input is
    /// exhausted and nothing was decoded or skipped.
    pub async fn next_batch(&mut self, max: usize) -> std::io::Result<Option<DecodedBatch>> {
        let mut batch = DecodedBatch::default();
        while !self.finished && batch.records.len() < max {
            let step = match self.format {
                RecordFormat::Ndjson => self.next_ndjson().await?,
                RecordFormat::LengthDelimited => self.next_frame().await?,
            };
            match step {
                Step::Record(record) => batch.records.push(record),
                Step::Malformed => batch.malformed += 1,
                Step::Skip => {}
                Step::Eof => self.finished = true,
            }
        }
        if batch.records.is_empty() && batch.malformed == 0 && self.finished {
            return Ok(None);
        }
        Ok(Some(batch))
    }

    async fn next_ndjson(&mut self) -> std::io::Result<Step> {
        self.line.clear();
        let n = self.inner.read_until(b'\n', &mut self.line).await?;
        if n == 0 {
            return Ok(Step::Eof);
        }
        let Ok(text) = std::str::from_utf8(&self.line) else {
            tracing::debug!(bytes = n, "Skipping line that is not valid UTF-8");
            return Ok(Step::Malformed);
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Step::Skip);
        }
        Ok(classify(decode_json(trimmed)))
    }

    async fn next_frame(&mut self) -> std::io::Result<Step> {
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(Step::Eof);
                }
                tracing::debug!(bytes = filled, "Truncated frame header at end of file");
                self.finished = true;
                return Ok(Step::Malformed);
            }
            filled += n;
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_BYTES {
            // Framing is lost; nothing after this point can be trusted
            tracing::debug!(len, "Frame exceeds maximum size, abandoning rest of file");
            self.finished = true;
            return Ok(Step::Malformed);
        }

        let mut body = vec![0u8; len];
        match self.inner.read_exact(&mut body).await {
            Ok(_) => Ok(classify(decode_frame(&body))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(len, "Truncated frame body at end of file");
                self.finished = true;
                Ok(Step::Malformed)
            }
            Err(e) => Err(e),
        }
    }
}

enum Step {
    Record(MetricRecord),
    Malformed,
    Skip,
    Eof,
}

fn classify(result: Result<MetricRecord, CodecError>) -> Step {
    match result {
        Ok(record) => Step::Record(record),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed record");
            Step::Malformed
        }
    }
}

/// Decode and validate one JSON record
pub fn decode_json(line: &str) -> Result<MetricRecord, CodecError> {
    let record: MetricRecord = serde_json::from_str(line)?;
    record.validate()?;
    Ok(record)
}

/// Decode and validate one MessagePack frame body
pub fn decode_frame(body: &[u8]) -> Result<MetricRecord, CodecError> {
    let record: MetricRecord = rmp_serde::from_slice(body)?;
    record.validate()?;
    Ok(record)
}

/// Encode records as newline-delimited JSON
pub fn encode_ndjson(records: &[MetricRecord]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Encode records as length-delimited MessagePack frames
pub fn encode_length_delimited(records: &[MetricRecord]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    for record in records {
        let body = rmp_serde::to_vec(record)?;
        if body.len() > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(body.len()));
        }
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
    }
    Ok(out)
}
