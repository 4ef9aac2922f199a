//! File source configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ArchiveError;
use crate::gate::GateConfig;
use crate::types::BlockRef;

/// Configuration for a file source instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSourceConfig {
    /// First block to deliver. Streaming starts at the archive file holding it.
    pub start_block: u64,
    /// Optional last block. `None` = run until shut down.
    pub stop_block: Option<u64>,
    /// How many archive files may be downloaded ahead of the consumer.
    pub parallel_downloads: usize,
    /// How many blocks of one file may be preprocessed concurrently.
    pub preprocess_concurrency: usize,
    /// Delay between two lookups of a missing archive file (milliseconds).
    pub retry_delay_ms: u64,
    /// Retries allowed for the same missing file; the source fails once it
    /// has missed that file more often. `None` = wait forever.
    pub missing_file_retry_limit: Option<u32>,
    /// Lowest block number the protocol can stream; floor for the
    /// missing-file notification.
    pub first_streamable_block: u64,
    /// Admission gate applied before preprocessing.
    pub gate: GateConfig,
    /// Skip blocks until this one is seen (inclusive).
    pub resume_cursor: Option<BlockRef>,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            stop_block: None,
            parallel_downloads: 1,
            preprocess_concurrency: 1,
            retry_delay_ms: 4000,
            missing_file_retry_limit: None,
            first_streamable_block: 0,
            gate: GateConfig::None,
            resume_cursor: None,
        }
    }
}

impl FileSourceConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.parallel_downloads == 0 {
            return Err(ArchiveError::Config("parallel_downloads must be at least 1".into()));
        }
        if self.preprocess_concurrency == 0 {
            return Err(ArchiveError::Config(
                "preprocess_concurrency must be at least 1".into(),
            ));
        }
        if let Some(stop) = self.stop_block {
            if stop < self.start_block {
                return Err(ArchiveError::Config(format!(
                    "stop_block {stop} is before start_block {}",
                    self.start_block
                )));
            }
        }
        Ok(())
    }
}
