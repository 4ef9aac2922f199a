//! Block readers turn an archive byte stream into blocks.
//!
//! The engine is format-agnostic: it only needs a [`BlockReaderFactory`].
//! [`JsonLinesReaderFactory`] is the bundled format, one JSON [`BlockRecord`]
//! per line with the payload hex-encoded.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::error::ArchiveError;
use crate::payload::{MemoryPayloadSetter, PayloadSetter};
use crate::types::Block;

/// Byte stream of one archive object.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Sequential block decoder over one archive object.
#[async_trait]
pub trait BlockReader: Send {
    /// Next block; `Ok(None)` at end of stream.
    async fn read(&mut self) -> Result<Option<Block>, ArchiveError>;
}

/// Builds a [`BlockReader`] for an opened archive object.
pub trait BlockReaderFactory: Send + Sync {
    fn new_reader(&self, reader: ObjectReader) -> Result<Box<dyn BlockReader>, ArchiveError>;
}

// ─── JSON lines ───────────────────────────────────────────────────────────────

/// One line of a JSON-lines archive file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: String,
    pub number: u64,
    #[serde(default)]
    pub parent_id: String,
    pub timestamp: DateTime<Utc>,
    /// Hex-encoded payload bytes.
    #[serde(default)]
    pub payload: String,
}

impl BlockRecord {
    pub fn new(
        id: impl Into<String>,
        number: u64,
        parent_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: &[u8],
    ) -> Self {
        Self {
            id: id.into(),
            number,
            parent_id: parent_id.into(),
            timestamp,
            payload: hex::encode(payload),
        }
    }
}

/// Serialize records into the JSON-lines archive format.
pub fn encode_blocks(records: &[BlockRecord]) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record).map_err(|e| ArchiveError::Other(e.to_string()))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Reads JSON-lines archives, attaching payloads through a [`PayloadSetter`].
pub struct JsonLinesReader {
    lines: Lines<BufReader<ObjectReader>>,
    setter: Arc<dyn PayloadSetter>,
    line_no: usize,
    last_number: Option<u64>,
}

impl JsonLinesReader {
    pub fn new(reader: ObjectReader, setter: Arc<dyn PayloadSetter>) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            setter,
            line_no: 0,
            last_number: None,
        }
    }

    fn decode_error(&self, reason: impl std::fmt::Display) -> ArchiveError {
        ArchiveError::Other(format!("line {}: {reason}", self.line_no))
    }
}

#[async_trait]
impl BlockReader for JsonLinesReader {
    async fn read(&mut self) -> Result<Option<Block>, ArchiveError> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.decode_error(e)),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record: BlockRecord =
                serde_json::from_str(&line).map_err(|e| self.decode_error(e))?;
            if let Some(last) = self.last_number {
                if record.number <= last {
                    return Err(self.decode_error(format!(
                        "block number {} does not follow {last}",
                        record.number
                    )));
                }
            }
            self.last_number = Some(record.number);

            let data = hex::decode(&record.payload).map_err(|e| self.decode_error(e))?;
            let block = Block::new(record.id, record.number, record.parent_id, record.timestamp);
            let block = self.setter.set_payload(block, Bytes::from(data)).await?;
            return Ok(Some(block));
        }
    }
}

/// Factory for [`JsonLinesReader`]s.
#[derive(Clone)]
pub struct JsonLinesReaderFactory {
    setter: Arc<dyn PayloadSetter>,
}

impl JsonLinesReaderFactory {
    pub fn new(setter: Arc<dyn PayloadSetter>) -> Self {
        Self { setter }
    }
}

impl Default for JsonLinesReaderFactory {
    fn default() -> Self {
        Self::new(Arc::new(MemoryPayloadSetter))
    }
}

impl BlockReaderFactory for JsonLinesReaderFactory {
    fn new_reader(&self, reader: ObjectReader) -> Result<Box<dyn BlockReader>, ArchiveError> {
        Ok(Box::new(JsonLinesReader::new(reader, Arc::clone(&self.setter))))
    }
}
