//! Cache-backed payloads with cold recovery.
//!
//! A [`CachedPayload`] only remembers which block it belongs to. Its bytes live
//! in a shared [`PayloadCache`]; when the cache no longer has them, a scoped
//! [`FileSource`](crate::FileSource) is started at the block's number and stopped as soon as the
//! exact block (id and number) goes by.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info, warn};

use chainarchive_core::error::ArchiveError;
use chainarchive_core::handler::HandlerFn;
use chainarchive_core::payload::{Payload, PayloadCache, PayloadSetter};
use chainarchive_core::reader::{BlockReaderFactory, JsonLinesReaderFactory};
use chainarchive_core::shutter::Shutter;
use chainarchive_core::store::ObjectStore;
use chainarchive_core::types::Block;

use crate::builder::FileSourceBuilder;

const DEFAULT_RECOVERY_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RECOVERY_RETRY_LIMIT: u32 = 3;

/// Everything cache-backed payloads need: the cache itself and the stores
/// to recover evicted blocks from.
pub struct PayloadCacheContext {
    cache: Arc<dyn PayloadCache>,
    blocks_store: Arc<dyn ObjectStore>,
    secondary_blocks_stores: Vec<Arc<dyn ObjectStore>>,
    /// Must attach in-memory payloads, or recovery would go through the cache
    /// again.
    reader_factory: Arc<dyn BlockReaderFactory>,
    retry_delay: Duration,
    recovery_retry_limit: u32,
}

impl PayloadCacheContext {
    pub fn new(cache: Arc<dyn PayloadCache>, blocks_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            cache,
            blocks_store,
            secondary_blocks_stores: vec![],
            reader_factory: Arc::new(JsonLinesReaderFactory::default()),
            retry_delay: DEFAULT_RECOVERY_RETRY_DELAY,
            recovery_retry_limit: DEFAULT_RECOVERY_RETRY_LIMIT,
        }
    }

    pub fn with_secondary_blocks_stores(mut self, stores: Vec<Arc<dyn ObjectStore>>) -> Self {
        self.secondary_blocks_stores = stores;
        self
    }

    pub fn with_reader_factory(mut self, factory: Arc<dyn BlockReaderFactory>) -> Self {
        self.reader_factory = factory;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// How many times recovery polls for a missing archive file before
    /// giving up with [`ArchiveError::BlockNotFound`].
    pub fn with_recovery_retry_limit(mut self, limit: u32) -> Self {
        self.recovery_retry_limit = limit;
        self
    }

    pub fn cache(&self) -> &Arc<dyn PayloadCache> {
        &self.cache
    }

    /// Payload bytes of block `id`: from the cache when present, otherwise
    /// recovered from the archive and written back into the cache.
    pub async fn fetch_payload(&self, id: &str, number: u64) -> Result<Bytes, ArchiveError> {
        if let Some(data) = self.cache.read(id).await? {
            return Ok(data);
        }

        let block = self.recover_block(id, number).await?;
        let data = block.payload.get().await?;

        self.cache.write(id, block.timestamp, Utc::now(), data.clone()).await?;
        Ok(data)
    }

    /// Stream the archive file holding `number` until the block `id` shows up.
    pub async fn recover_block(&self, id: &str, number: u64) -> Result<Block, ArchiveError> {
        info!(block_id = id, block_num = number, "block data not cached, reading block from file source");

        let found: Arc<OnceLock<Block>> = Arc::new(OnceLock::new());
        let shutter = Arc::new(Shutter::new());

        let handler = {
            let found = Arc::clone(&found);
            let shutter = Arc::clone(&shutter);
            let target = id.to_string();
            HandlerFn(move |blk: &Block, _obj: Option<&serde_json::Value>| -> Result<(), ArchiveError> {
                if blk.number != number || blk.id != target {
                    return Ok(());
                }
                let _ = found.set(blk.clone());
                shutter.shutdown(None);
                Ok(())
            })
        };

        let source = FileSourceBuilder::new(Arc::clone(&self.blocks_store), Arc::new(handler))
            .secondary_blocks_stores(self.secondary_blocks_stores.clone())
            .reader_factory(Arc::clone(&self.reader_factory))
            .start_block(number)
            .stop_block(number)
            .retry_delay(self.retry_delay)
            .missing_file_retry_limit(self.recovery_retry_limit)
            .shutter(shutter)
            .build()?;

        let outcome = tokio::spawn(source.run())
            .await
            .map_err(|e| ArchiveError::Other(format!("recovery task for #{number}: {e}")))?;

        if let Some(block) = found.get() {
            debug!(block = %block, "block recovered from archive");
            return Ok(block.clone());
        }

        match outcome {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                warn!(block_num = number, error = %e, "archive file still missing, giving up recovery");
            }
            Err(e) => return Err(e),
        }
        Err(ArchiveError::BlockNotFound { id: id.to_string(), number })
    }
}

impl fmt::Debug for PayloadCacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadCacheContext")
            .field("blocks_store", &self.blocks_store.object_path(""))
            .field("secondary_blocks_stores", &self.secondary_blocks_stores.len())
            .field("retry_delay", &self.retry_delay)
            .field("recovery_retry_limit", &self.recovery_retry_limit)
            .finish()
    }
}

/// Payload whose bytes are fetched from the cache, or recovered from the
/// archive on a miss.
#[derive(Debug)]
pub struct CachedPayload {
    block_id: String,
    block_num: u64,
    data_size: usize,
    ctx: Arc<PayloadCacheContext>,
}

impl CachedPayload {
    /// Size of the bytes when they were first cached.
    pub fn data_size(&self) -> usize {
        self.data_size
    }
}

#[async_trait]
impl Payload for CachedPayload {
    async fn len(&self) -> i64 {
        match self.get().await {
            Ok(data) => data.len() as i64,
            Err(_) => -1,
        }
    }

    async fn get(&self) -> Result<Bytes, ArchiveError> {
        self.ctx.fetch_payload(&self.block_id, self.block_num).await
    }
}

/// Writes payloads through to the cache and attaches a [`CachedPayload`].
#[derive(Debug, Clone)]
pub struct CachedPayloadSetter {
    ctx: Arc<PayloadCacheContext>,
}

impl CachedPayloadSetter {
    pub fn new(ctx: Arc<PayloadCacheContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PayloadSetter for CachedPayloadSetter {
    async fn set_payload(&self, block: Block, data: Bytes) -> Result<Block, ArchiveError> {
        let data_size = data.len();
        self.ctx
            .cache
            .write(&block.id, block.timestamp, Utc::now(), data)
            .await?;

        let payload = CachedPayload {
            block_id: block.id.clone(),
            block_num: block.number,
            data_size,
            ctx: Arc::clone(&self.ctx),
        };
        Ok(block.with_payload(Arc::new(payload)))
    }
}
