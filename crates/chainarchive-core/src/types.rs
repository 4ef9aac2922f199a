//! Shared types for the streaming pipeline.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payload::{MemoryPayload, Payload};

/// Number of blocks held by one blocks archive file.
pub const FILE_BLOCKS_STRIDE: u64 = 100;

/// Base block number of the archive file that holds `block_num`.
pub fn base_block_num(block_num: u64) -> u64 {
    block_num - (block_num % FILE_BLOCKS_STRIDE)
}

/// Archive filename for a base block number (zero-padded to 10 digits).
pub fn base_filename(base_block_num: u64) -> String {
    format!("{base_block_num:010}")
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block as read from an archive file.
///
/// The payload is shared, so cloning a block is cheap.
#[derive(Clone)]
pub struct Block {
    /// Opaque block identity (usually a hash).
    pub id: String,
    /// Block number; strictly increasing within one archive file.
    pub number: u64,
    /// Identity of the parent block, as recorded in the archive.
    pub parent_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Arc<dyn Payload>,
}

impl Block {
    /// A block with an empty in-memory payload.
    pub fn new(
        id: impl Into<String>,
        number: u64,
        parent_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            number,
            parent_id: parent_id.into(),
            timestamp,
            payload: Arc::new(MemoryPayload::default()),
        }
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: Arc<dyn Payload>) -> Self {
        self.payload = payload;
        self
    }

    /// The `(id, number)` reference of this block.
    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.id.clone(), self.number)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("number", &self.number)
            .field("parent_id", &self.parent_id)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.id)
    }
}

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// An `(id, number)` pair, used as a resume cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub id: String,
    pub number: u64,
}

impl BlockRef {
    pub fn new(id: impl Into<String>, number: u64) -> Self {
        Self { id: id.into(), number }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.id)
    }
}

// ─── PreprocessedBlock ────────────────────────────────────────────────────────

/// A block paired with the result of the configured preprocessor.
#[derive(Debug, Clone)]
pub struct PreprocessedBlock {
    pub block: Block,
    /// `None` when no preprocessor is configured.
    pub obj: Option<serde_json::Value>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
