//! Local directory object store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use chainarchive_core::error::ArchiveError;
use chainarchive_core::reader::ObjectReader;
use chainarchive_core::store::ObjectStore;

/// Archive files stored as `<root>/<name><extension>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    extension: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), extension: String::new() }
    }

    /// Suffix appended to every object name (e.g. `".jsonl"`).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{}", self.extension))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn file_exists(&self, name: &str) -> Result<bool, ArchiveError> {
        let path = self.path_of(name);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ArchiveError::Store(format!("checking {}: {e}", path.display())))
    }

    async fn open_object(&self, name: &str) -> Result<ObjectReader, ArchiveError> {
        let path = self.path_of(name);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| ArchiveError::Store(format!("opening {}: {e}", path.display())))?;
        Ok(Box::new(file))
    }

    fn object_path(&self, name: &str) -> String {
        self.path_of(name).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn exists_and_open_with_extension() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("0000000300.jsonl"), b"payload").unwrap();

        let store = LocalObjectStore::new(dir).with_extension(".jsonl");
        assert!(store.file_exists("0000000300").await.unwrap());
        assert!(!store.file_exists("0000000400").await.unwrap());
        assert!(store.object_path("0000000300").ends_with("0000000300.jsonl"));

        let mut reader = store.open_object("0000000300").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"payload");
    }

    #[tokio::test]
    async fn open_missing_is_store_error() {
        let tmp = TempDir::new().unwrap();
        let store = LocalObjectStore::new(tmp.path());
        let err = store.open_object("0000000000").await.err().unwrap();
        assert!(matches!(err, ArchiveError::Store(_)));
    }
}
