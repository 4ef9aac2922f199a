//! The file source discovers blocks archive files and streams their blocks,
//! in order, to a handler.
//!
//! # Locator
//! Starting at the archive file holding `start_block`, look the file up in the
//! primary store, then in each secondary store in order. A miss notifies the
//! optional callback, sleeps `retry_delay` and tries the same file again. A hit
//! queues the file for the sink (bounded by `parallel_downloads`), spawns its
//! download/decode task and moves on to the next file.
//!
//! # Sink
//! Reads queued files in discovery order, drains each one completely and hands
//! every block to the handler before touching the next file.
//!
//! Any fatal error on any task shuts the whole source down through its
//! [`Shutter`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use chainarchive_core::config::FileSourceConfig;
use chainarchive_core::error::ArchiveError;
use chainarchive_core::gate::Gate;
use chainarchive_core::handler::{Handler, Preprocessor};
use chainarchive_core::reader::BlockReaderFactory;
use chainarchive_core::shutter::Shutter;
use chainarchive_core::store::ObjectStore;
use chainarchive_core::types::{base_block_num, base_filename, PreprocessedBlock, FILE_BLOCKS_STRIDE};

use crate::metrics::{MetricsSnapshot, SourceMetrics};
use crate::pipeline::Pipeline;

/// Called with the (floored) base block number of an archive file that no
/// store holds yet.
pub type NotFoundCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Capacity of one file's preprocessed-blocks queue.
const INCOMING_FILE_BUFFER: usize = 2;

/// An archive file handed from the locator to the sink.
struct IncomingBlocksFile {
    filename: String,
    blocks: mpsc::Receiver<PreprocessedBlock>,
}

/// Streams blocks archives to a [`Handler`]. Build one with
/// [`FileSourceBuilder`](crate::builder::FileSourceBuilder).
pub struct FileSource {
    pub(crate) config: FileSourceConfig,
    pub(crate) blocks_store: Arc<dyn ObjectStore>,
    /// Tried in order when `blocks_store` lacks a file.
    pub(crate) secondary_blocks_stores: Vec<Arc<dyn ObjectStore>>,
    pub(crate) reader_factory: Arc<dyn BlockReaderFactory>,
    pub(crate) preprocessor: Option<Arc<dyn Preprocessor>>,
    pub(crate) gate: Option<Arc<dyn Gate>>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) not_found_callback: Option<NotFoundCallback>,
    pub(crate) shutter: Arc<Shutter>,
    pub(crate) metrics: Arc<SourceMetrics>,
}

impl FileSource {
    pub fn config(&self) -> &FileSourceConfig {
        &self.config
    }

    /// The shutdown domain shared by every task of this source.
    pub fn shutter(&self) -> &Arc<Shutter> {
        &self.shutter
    }

    /// Request termination; see [`Shutter::shutdown`].
    pub fn shutdown(&self, err: Option<ArchiveError>) {
        self.shutter.shutdown(err);
    }

    pub fn is_terminating(&self) -> bool {
        self.shutter.is_terminating()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run until shut down, a fatal error occurs, or (with a `stop_block`)
    /// every archive file up to it has been delivered.
    ///
    /// Returns the terminal error, `Ok(())` on a clean stop.
    pub async fn run(self: Arc<Self>) -> Result<(), ArchiveError> {
        let (file_tx, file_rx) = mpsc::channel(self.config.parallel_downloads);
        let sink = tokio::spawn(Arc::clone(&self).launch_sink(file_rx));

        if let Err(e) = self.run_merge_files(file_tx).await {
            self.shutter.shutdown(Some(e));
        }

        if let Err(e) = sink.await {
            self.shutter.shutdown(Some(ArchiveError::Other(format!("sink task: {e}"))));
        }
        self.shutter.shutdown(None);

        match self.shutter.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_merge_files(
        self: &Arc<Self>,
        file_tx: mpsc::Sender<IncomingBlocksFile>,
    ) -> Result<(), ArchiveError> {
        let retry_delay = self.config.retry_delay();
        let mut current_index = self.config.start_block;
        let mut delay = Duration::ZERO;
        let mut misses = 0u32;

        loop {
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.shutter.terminating() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if self.shutter.is_terminating() {
                info!("blocks archive streaming was asked to stop");
                return Ok(());
            }

            let base = base_block_num(current_index);
            if let Some(stop) = self.config.stop_block {
                if base > stop {
                    info!(stop_block = stop, "reached stop block, no more archive files to look for");
                    return Ok(());
                }
            }
            debug!(base_block_num = base, "file stream looking for");

            let filename = base_filename(base);
            let Some(store) = self.locate(&filename).await? else {
                misses += 1;
                self.metrics.file_missing();
                info!(
                    filename = %self.blocks_store.object_path(&filename),
                    base_filename = %filename,
                    retry_delay_ms = retry_delay.as_millis() as u64,
                    secondary_blocks_stores_count = self.secondary_blocks_stores.len(),
                    "reading from blocks store: file does not (yet?) exist, retrying"
                );

                if let Some(callback) = &self.not_found_callback {
                    let merger_base = base.max(self.config.first_streamable_block);
                    info!(base_block_num = merger_base, "asking merger for missing files");
                    callback(merger_base);
                }

                if let Some(limit) = self.config.missing_file_retry_limit {
                    if misses > limit {
                        return Err(ArchiveError::FileMissing { filename, attempts: misses });
                    }
                }
                delay = retry_delay;
                continue;
            };
            delay = Duration::ZERO;
            misses = 0;

            let (blocks_tx, blocks_rx) = mpsc::channel(INCOMING_FILE_BUFFER);
            let incoming = IncomingBlocksFile { filename: filename.clone(), blocks: blocks_rx };

            debug!(filename = %filename, "downloading archive file");
            tokio::select! {
                biased;
                _ = self.shutter.terminating() => return Ok(()),
                sent = file_tx.send(incoming) => {
                    sent.map_err(|_| ArchiveError::Other(format!("queueing {filename}: sink is gone")))?;
                }
            }
            self.metrics.file_discovered();
            debug!(filename = %filename, "new incoming file");

            tokio::spawn(Arc::clone(self).stream_incoming_file(filename, store, blocks_tx));

            current_index = match base.checked_add(FILE_BLOCKS_STRIDE) {
                Some(next) => next,
                None => {
                    info!(base_block_num = base, "last addressable archive file queued");
                    return Ok(());
                }
            };
        }
    }

    /// First store holding `filename`: the primary, then secondaries in order.
    async fn locate(&self, filename: &str) -> Result<Option<Arc<dyn ObjectStore>>, ArchiveError> {
        if self.blocks_store.file_exists(filename).await? {
            return Ok(Some(Arc::clone(&self.blocks_store)));
        }
        for store in &self.secondary_blocks_stores {
            if store.file_exists(filename).await? {
                debug!(filename = %store.object_path(filename), "found in secondary blocks store");
                return Ok(Some(Arc::clone(store)));
            }
        }
        Ok(None)
    }

    async fn stream_incoming_file(
        self: Arc<Self>,
        filename: String,
        store: Arc<dyn ObjectStore>,
        output: mpsc::Sender<PreprocessedBlock>,
    ) {
        debug!(base_filename = %filename, "launching processing of file");
        // `output` outlives the pipeline so the sink cannot see this file as
        // complete before a failure is recorded on the shutter
        if let Err(e) = self.stream_file(&filename, store.as_ref(), output.clone()).await {
            self.shutter.shutdown(Some(e));
        }
        drop(output);
    }

    async fn stream_file(
        &self,
        filename: &str,
        store: &dyn ObjectStore,
        output: mpsc::Sender<PreprocessedBlock>,
    ) -> Result<(), ArchiveError> {
        let open_file = self.metrics.open_file();
        debug!(count = open_file.count, filename, "open files");

        let object = store.open_object(filename).await?;
        let reader = self
            .reader_factory
            .new_reader(object)
            .map_err(|e| ArchiveError::Decode {
                filename: filename.to_string(),
                reason: format!("unable to create block reader: {e}"),
            })?;

        self.pipeline(filename).run(reader, output).await
    }

    fn pipeline(&self, filename: &str) -> Pipeline {
        // the cursor only applies to the archive file that holds it
        let resume_cursor = self
            .config
            .resume_cursor
            .clone()
            .filter(|cursor| base_filename(base_block_num(cursor.number)) == filename);

        Pipeline {
            filename: filename.to_string(),
            start_block: self.config.start_block,
            stop_block: self.config.stop_block,
            resume_cursor,
            concurrency: self.config.preprocess_concurrency,
            gate: self.gate.clone(),
            preprocessor: self.preprocessor.clone(),
            shutter: Arc::clone(&self.shutter),
            metrics: Arc::clone(&self.metrics),
        }
    }

    async fn launch_sink(self: Arc<Self>, mut files: mpsc::Receiver<IncomingBlocksFile>) {
        loop {
            let mut incoming = tokio::select! {
                biased;
                _ = self.shutter.terminating() => {
                    debug!("terminating by launch sink");
                    return;
                }
                file = files.recv() => match file {
                    Some(file) => file,
                    None => {
                        debug!("no more incoming files");
                        return;
                    }
                },
            };
            debug!(filename = %incoming.filename, "feeding from incoming file");

            loop {
                let preprocessed = tokio::select! {
                    biased;
                    _ = self.shutter.terminating() => return,
                    block = incoming.blocks.recv() => match block {
                        Some(block) => block,
                        None => break,
                    },
                };

                let delivered = self
                    .handler
                    .process_block(&preprocessed.block, preprocessed.obj.as_ref())
                    .await;
                if let Err(e) = delivered {
                    let err = match e {
                        ArchiveError::Handler(_) => e,
                        other => ArchiveError::Handler(other.to_string()),
                    };
                    self.shutter.shutdown(Some(err));
                    return;
                }
                self.metrics.block_delivered();
            }
        }
    }
}
