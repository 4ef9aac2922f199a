//! chainarchive-source: ordered streaming of block archive files.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainarchive_core::{ArchiveError, Block, HandlerFn};
//! use chainarchive_source::FileSourceBuilder;
//! use chainarchive_storage::LocalObjectStore;
//!
//! # async fn example() -> Result<(), ArchiveError> {
//! let store = Arc::new(LocalObjectStore::new("/data/merged-blocks"));
//! let handler = HandlerFn(|blk: &Block, _obj: Option<&serde_json::Value>| -> Result<(), ArchiveError> {
//!     println!("{blk}");
//!     Ok(())
//! });
//!
//! let source = FileSourceBuilder::new(store, Arc::new(handler))
//!     .start_block(1_000)
//!     .parallel_downloads(2)
//!     .build()?;
//! source.run().await
//! # }
//! ```

pub mod builder;
pub mod cached;
pub mod file_source;
pub mod metrics;
mod pipeline;

pub use builder::FileSourceBuilder;
pub use cached::{CachedPayload, CachedPayloadSetter, PayloadCacheContext};
pub use file_source::{FileSource, NotFoundCallback};
pub use metrics::{MetricsSnapshot, SourceMetrics};
