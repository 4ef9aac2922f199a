//! In-memory payload cache with two admission budgets.
//!
//! An entry survives eviction if it is among the most recently *written*
//! entries fitting in `max_recent_entry_bytes`, or among the entries with the
//! most recent *block* timestamps fitting in `max_entry_by_age_bytes`.
//! Everything else is dropped, least useful first.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chainarchive_core::error::ArchiveError;
use chainarchive_core::payload::PayloadCache;

struct Entry {
    data: Bytes,
    primary: DateTime<Utc>,
    written: DateTime<Utc>,
}

pub struct MemoryPayloadCache {
    max_recent_entry_bytes: usize,
    max_entry_by_age_bytes: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryPayloadCache {
    pub fn new(max_recent_entry_bytes: usize, max_entry_by_age_bytes: usize) -> Self {
        Self {
            max_recent_entry_bytes,
            max_entry_by_age_bytes,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes currently held.
    pub fn total_bytes(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.values().map(|v| v.data.len()).sum())
            .unwrap_or(0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().map(|e| e.contains_key(key)).unwrap_or(false)
    }

    fn evict(&self, entries: &mut HashMap<String, Entry>) {
        let mut keep: HashSet<String> = HashSet::new();

        let mut by_written: Vec<(&String, &Entry)> = entries.iter().collect();
        by_written.sort_by(|a, b| b.1.written.cmp(&a.1.written).then_with(|| a.0.cmp(b.0)));
        keep.extend(within_budget(&by_written, self.max_recent_entry_bytes));

        let mut by_age: Vec<(&String, &Entry)> = entries.iter().collect();
        by_age.sort_by(|a, b| b.1.primary.cmp(&a.1.primary).then_with(|| a.0.cmp(b.0)));
        keep.extend(within_budget(&by_age, self.max_entry_by_age_bytes));

        let before = entries.len();
        entries.retain(|key, _| keep.contains(key));
        if entries.len() < before {
            tracing::debug!(evicted = before - entries.len(), remaining = entries.len(), "payload cache eviction");
        }
    }
}

/// Keys of the entries, taken in order, whose sizes add up to at most
/// `budget`. An entry that does not fit is skipped, not a stopping point.
fn within_budget(sorted: &[(&String, &Entry)], budget: usize) -> Vec<String> {
    let mut used = 0usize;
    let mut keys = Vec::new();
    for (key, entry) in sorted {
        if used + entry.data.len() > budget {
            continue;
        }
        used += entry.data.len();
        keys.push((*key).clone());
    }
    keys
}

#[async_trait]
impl PayloadCache for MemoryPayloadCache {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, ArchiveError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| ArchiveError::Cache(e.to_string()))?;
        Ok(entries.get(key).map(|e| e.data.clone()))
    }

    async fn write(
        &self,
        key: &str,
        primary_timestamp: DateTime<Utc>,
        write_timestamp: DateTime<Utc>,
        data: Bytes,
    ) -> Result<(), ArchiveError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ArchiveError::Cache(e.to_string()))?;
        entries.insert(
            key.to_string(),
            Entry { data, primary: primary_timestamp, written: write_timestamp },
        );
        self.evict(&mut entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn read_write_roundtrip() {
        let cache = MemoryPayloadCache::new(1024, 1024);
        assert!(cache.read("a").await.unwrap().is_none());

        cache.write("a", at(1), at(10), Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(cache.read("a").await.unwrap(), Some(Bytes::from_static(b"abc")));
        assert_eq!(cache.total_bytes(), 3);
    }

    #[tokio::test]
    async fn recent_budget_keeps_latest_writes() {
        // age budget too small to keep anything on its own
        let cache = MemoryPayloadCache::new(8, 0);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache
                .write(key, at(100), at(i as i64), Bytes::from(vec![0u8; 4]))
                .await
                .unwrap();
        }
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.total_bytes(), 8);
    }

    #[tokio::test]
    async fn age_budget_keeps_youngest_blocks() {
        let cache = MemoryPayloadCache::new(4, 4);
        // "old-block" written last, "young-block" has the newest block time
        cache.write("young-block", at(500), at(1), Bytes::from(vec![0u8; 4])).await.unwrap();
        cache.write("mid-block", at(300), at(2), Bytes::from(vec![0u8; 4])).await.unwrap();
        cache.write("old-block", at(100), at(3), Bytes::from(vec![0u8; 4])).await.unwrap();

        assert!(cache.contains("young-block")); // by age
        assert!(cache.contains("old-block")); // by recency
        assert!(!cache.contains("mid-block"));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn oversized_write_does_not_flush_smaller_entries() {
        let cache = MemoryPayloadCache::new(16, 0);
        cache.write("a", at(100), at(1), Bytes::from(vec![0u8; 4])).await.unwrap();
        cache.write("b", at(100), at(2), Bytes::from(vec![0u8; 4])).await.unwrap();
        cache.write("big", at(100), at(3), Bytes::from(vec![0u8; 20])).await.unwrap();

        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(!cache.contains("big"));
        assert_eq!(cache.total_bytes(), 8);
    }
}
