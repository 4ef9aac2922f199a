//! Block payloads, payload setters and the payload cache seam.
//!
//! A payload knows its byte length and how to produce its bytes. The in-memory
//! kind holds the bytes directly; cache-backed kinds (see
//! `chainarchive-source::cached`) only hold enough to find the bytes again.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use crate::error::ArchiveError;
use crate::types::Block;

/// Sized, retrievable block payload.
#[async_trait]
pub trait Payload: Send + Sync + fmt::Debug {
    /// Number of payload bytes. May load the payload to find out.
    ///
    /// A negative value means loading failed; [`Payload::get`] returns the
    /// error.
    async fn len(&self) -> i64;

    /// The payload bytes.
    async fn get(&self) -> Result<Bytes, ArchiveError>;
}

/// Payload held in memory.
#[derive(Clone, Default)]
pub struct MemoryPayload {
    data: Bytes,
}

impl MemoryPayload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl fmt::Debug for MemoryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPayload").field("len", &self.data.len()).finish()
    }
}

#[async_trait]
impl Payload for MemoryPayload {
    async fn len(&self) -> i64 {
        self.data.len() as i64
    }

    async fn get(&self) -> Result<Bytes, ArchiveError> {
        Ok(self.data.clone())
    }
}

/// Attaches payload bytes to a freshly decoded block.
///
/// Block readers delegate to a setter, so the payload kind is chosen by
/// whoever builds the reader factory.
#[async_trait]
pub trait PayloadSetter: Send + Sync {
    async fn set_payload(&self, block: Block, data: Bytes) -> Result<Block, ArchiveError>;
}

/// Keeps payload bytes in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryPayloadSetter;

#[async_trait]
impl PayloadSetter for MemoryPayloadSetter {
    async fn set_payload(&self, block: Block, data: Bytes) -> Result<Block, ArchiveError> {
        Ok(block.with_payload(Arc::new(MemoryPayload::new(data))))
    }
}

/// Bounded byte cache keyed by block id.
///
/// Implementations bound admission by two budgets: bytes of the most recently
/// written entries, and bytes of the entries with the most recent primary
/// (block) timestamps.
#[async_trait]
pub trait PayloadCache: Send + Sync {
    /// `Ok(None)` on a miss.
    async fn read(&self, key: &str) -> Result<Option<Bytes>, ArchiveError>;

    async fn write(
        &self,
        key: &str,
        primary_timestamp: DateTime<Utc>,
        write_timestamp: DateTime<Utc>,
        data: Bytes,
    ) -> Result<(), ArchiveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_payload_len_and_get() {
        let payload = MemoryPayload::new(vec![1u8, 2, 3]);
        assert_eq!(payload.len().await, 3);
        assert_eq!(payload.get().await.unwrap(), Bytes::from_static(&[1, 2, 3]));
    }

    #[tokio::test]
    async fn memory_setter_attaches_bytes() {
        let blk = Block::new("00aa", 7, "0099", Utc::now());
        assert_eq!(blk.payload.len().await, 0);

        let blk = MemoryPayloadSetter
            .set_payload(blk, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(blk.payload.len().await, 5);
        assert_eq!(blk.payload.get().await.unwrap(), Bytes::from_static(b"hello"));
    }
}
