//! Engine-owned counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters of one file source. Shared by its tasks, never process-wide.
#[derive(Debug, Default)]
pub struct SourceMetrics {
    files_discovered: AtomicU64,
    files_missing: AtomicU64,
    open_files: AtomicI64,
    blocks_read: AtomicU64,
    blocks_skipped: AtomicU64,
    blocks_delivered: AtomicU64,
}

/// Point-in-time copy of [`SourceMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub files_discovered: u64,
    /// Lookups that found the file in no store.
    pub files_missing: u64,
    pub open_files: i64,
    pub blocks_read: u64,
    /// Blocks dropped by range, resume cursor or gate.
    pub blocks_skipped: u64,
    pub blocks_delivered: u64,
}

impl SourceMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_discovered: self.files_discovered.load(Ordering::Relaxed),
            files_missing: self.files_missing.load(Ordering::Relaxed),
            open_files: self.open_files.load(Ordering::Relaxed),
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            blocks_skipped: self.blocks_skipped.load(Ordering::Relaxed),
            blocks_delivered: self.blocks_delivered.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn file_discovered(&self) {
        self.files_discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn file_missing(&self) {
        self.files_missing.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the open-files gauge until the guard is dropped.
    pub(crate) fn open_file(&self) -> OpenFileGuard<'_> {
        let count = self.open_files.fetch_add(1, Ordering::Relaxed) + 1;
        OpenFileGuard { metrics: self, count }
    }

    pub(crate) fn block_read(&self) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn block_skipped(&self) {
        self.blocks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn block_delivered(&self) {
        self.blocks_delivered.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) struct OpenFileGuard<'a> {
    metrics: &'a SourceMetrics,
    /// Gauge value right after this file was opened.
    pub(crate) count: i64,
}

impl Drop for OpenFileGuard<'_> {
    fn drop(&mut self) {
        self.metrics.open_files.fetch_sub(1, Ordering::Relaxed);
    }
}
