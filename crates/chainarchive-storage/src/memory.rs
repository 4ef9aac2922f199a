//! In-memory object store.
//!
//! Holds archive files in RAM and records every lookup and open, which makes
//! it the store of choice for tests and short-lived tooling.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chainarchive_core::error::ArchiveError;
use chainarchive_core::reader::ObjectReader;
use chainarchive_core::store::ObjectStore;

/// In-memory blocks archive store.
#[derive(Default)]
pub struct MemoryObjectStore {
    name: String,
    files: Mutex<HashMap<String, Bytes>>,
    exists_checks: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryObjectStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Add or replace an archive file.
    pub fn put(&self, filename: impl Into<String>, data: impl Into<Bytes>) {
        lock(&self.files).insert(filename.into(), data.into());
    }

    pub fn remove(&self, filename: &str) {
        lock(&self.files).remove(filename);
    }

    /// Names passed to `file_exists`, in call order.
    pub fn exists_checks(&self) -> Vec<String> {
        lock(&self.exists_checks).clone()
    }

    /// Names passed to `open_object`, in call order.
    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn file_exists(&self, name: &str) -> Result<bool, ArchiveError> {
        lock(&self.exists_checks).push(name.to_string());
        Ok(lock(&self.files).contains_key(name))
    }

    async fn open_object(&self, name: &str) -> Result<ObjectReader, ArchiveError> {
        lock(&self.opened).push(name.to_string());
        let data = lock(&self.files)
            .get(name)
            .cloned()
            .ok_or_else(|| ArchiveError::Store(format!("{} does not exist", self.object_path(name))))?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    fn object_path(&self, name: &str) -> String {
        format!("memory://{}/{name}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn put_exists_open() {
        let store = MemoryObjectStore::new("primary");
        assert!(!store.file_exists("0000000100").await.unwrap());

        store.put("0000000100", Bytes::from_static(b"blocks"));
        assert!(store.file_exists("0000000100").await.unwrap());

        let mut reader = store.open_object("0000000100").await.unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "blocks");

        assert_eq!(store.exists_checks(), vec!["0000000100", "0000000100"]);
        assert_eq!(store.opened(), vec!["0000000100"]);
    }

    #[tokio::test]
    async fn open_missing_file_fails() {
        let store = MemoryObjectStore::new("primary");
        let err = store.open_object("0000000200").await.err().unwrap();
        assert!(err.to_string().contains("memory://primary/0000000200"));
    }

    #[tokio::test]
    async fn remove_file() {
        let store = MemoryObjectStore::new("s");
        store.put("0000000000", Bytes::new());
        store.remove("0000000000");
        assert!(!store.file_exists("0000000000").await.unwrap());
    }
}
