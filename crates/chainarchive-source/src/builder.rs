//! Fluent builder API for file sources.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chainarchive_core::{ArchiveError, Block, HandlerFn};
//! use chainarchive_source::FileSourceBuilder;
//! # async fn example(store: Arc<dyn chainarchive_core::ObjectStore>) -> Result<(), ArchiveError> {
//! let handler = HandlerFn(|blk: &Block, _obj: Option<&serde_json::Value>| -> Result<(), ArchiveError> {
//!     println!("{blk}");
//!     Ok(())
//! });
//!
//! let source = FileSourceBuilder::new(store, Arc::new(handler))
//!     .start_block(19_000_000)
//!     .parallel_downloads(4)
//!     .preprocess_concurrency(8)
//!     .time_threshold_gate(Duration::from_secs(3600))
//!     .build()?;
//! source.run().await
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chainarchive_core::config::FileSourceConfig;
use chainarchive_core::error::ArchiveError;
use chainarchive_core::gate::{Gate, GateConfig};
use chainarchive_core::handler::{Handler, Preprocessor};
use chainarchive_core::reader::{BlockReaderFactory, JsonLinesReaderFactory};
use chainarchive_core::shutter::Shutter;
use chainarchive_core::store::ObjectStore;
use chainarchive_core::types::BlockRef;

use crate::file_source::{FileSource, NotFoundCallback};
use crate::metrics::SourceMetrics;

/// Fluent builder for [`FileSource`].
pub struct FileSourceBuilder {
    config: FileSourceConfig,
    blocks_store: Arc<dyn ObjectStore>,
    handler: Arc<dyn Handler>,
    secondary_blocks_stores: Vec<Arc<dyn ObjectStore>>,
    reader_factory: Option<Arc<dyn BlockReaderFactory>>,
    preprocessor: Option<Arc<dyn Preprocessor>>,
    gate: Option<Arc<dyn Gate>>,
    not_found_callback: Option<NotFoundCallback>,
    shutter: Option<Arc<Shutter>>,
}

impl FileSourceBuilder {
    pub fn new(blocks_store: Arc<dyn ObjectStore>, handler: Arc<dyn Handler>) -> Self {
        Self {
            config: FileSourceConfig::default(),
            blocks_store,
            handler,
            secondary_blocks_stores: vec![],
            reader_factory: None,
            preprocessor: None,
            gate: None,
            not_found_callback: None,
            shutter: None,
        }
    }

    /// Replace the whole serializable configuration.
    pub fn config(mut self, config: FileSourceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Stop cleanly once every block up to `block` was delivered.
    pub fn stop_block(mut self, block: u64) -> Self {
        self.config.stop_block = Some(block);
        self
    }

    /// Number of archive files downloaded ahead of the handler.
    pub fn parallel_downloads(mut self, n: usize) -> Self {
        self.config.parallel_downloads = n;
        self
    }

    /// Number of blocks of one file preprocessed concurrently.
    pub fn preprocess_concurrency(mut self, n: usize) -> Self {
        self.config.preprocess_concurrency = n;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn missing_file_retry_limit(mut self, limit: u32) -> Self {
        self.config.missing_file_retry_limit = Some(limit);
        self
    }

    pub fn first_streamable_block(mut self, block: u64) -> Self {
        self.config.first_streamable_block = block;
        self
    }

    /// Only pass blocks younger than `threshold`.
    pub fn time_threshold_gate(mut self, threshold: Duration) -> Self {
        tracing::info!(threshold_secs = threshold.as_secs(), "setting time gate");
        self.config.gate = GateConfig::RecencyThreshold { threshold_secs: threshold.as_secs() };
        self
    }

    /// Custom gate; takes precedence over the configured one.
    pub fn gate(mut self, gate: Arc<dyn Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn resume_cursor(mut self, cursor: BlockRef) -> Self {
        self.config.resume_cursor = Some(cursor);
        self
    }

    /// Stores tried, in order, when the primary store lacks a file.
    pub fn secondary_blocks_stores(mut self, stores: Vec<Arc<dyn ObjectStore>>) -> Self {
        self.secondary_blocks_stores = stores;
        self
    }

    /// Defaults to JSON-lines archives with in-memory payloads.
    pub fn reader_factory(mut self, factory: Arc<dyn BlockReaderFactory>) -> Self {
        self.reader_factory = Some(factory);
        self
    }

    pub fn preprocessor(mut self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Called each time an archive file is missing from every store.
    pub fn not_found_callback(mut self, callback: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.not_found_callback = Some(Arc::new(callback));
        self
    }

    /// Share an existing shutdown domain instead of creating one.
    pub fn shutter(mut self, shutter: Arc<Shutter>) -> Self {
        self.shutter = Some(shutter);
        self
    }

    pub fn build(self) -> Result<Arc<FileSource>, ArchiveError> {
        self.config.validate()?;

        let gate = self.gate.or_else(|| self.config.gate.build());
        let reader_factory = self
            .reader_factory
            .unwrap_or_else(|| Arc::new(JsonLinesReaderFactory::default()));

        Ok(Arc::new(FileSource {
            config: self.config,
            blocks_store: self.blocks_store,
            secondary_blocks_stores: self.secondary_blocks_stores,
            reader_factory,
            preprocessor: self.preprocessor,
            gate,
            handler: self.handler,
            not_found_callback: self.not_found_callback,
            shutter: self.shutter.unwrap_or_default(),
            metrics: Arc::new(SourceMetrics::default()),
        }))
    }
}
