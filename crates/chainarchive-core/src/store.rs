//! Object store seam for blocks archives.

use async_trait::async_trait;

use crate::error::ArchiveError;
use crate::reader::ObjectReader;

/// Durable store holding blocks archive files by name.
///
/// Implementations include `MemoryObjectStore` and `LocalObjectStore`
/// in `chainarchive-storage`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn file_exists(&self, name: &str) -> Result<bool, ArchiveError>;

    async fn open_object(&self, name: &str) -> Result<ObjectReader, ArchiveError>;

    /// Full path or URL of `name`, for logging.
    fn object_path(&self, name: &str) -> String;
}
