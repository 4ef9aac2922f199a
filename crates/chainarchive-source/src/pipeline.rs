//! Ordered preprocessing pipeline for one archive file.
//!
//! Blocks are read sequentially, filtered, and handed to concurrent
//! preprocessing tasks. Each admitted block first gets a result slot (a
//! oneshot receiver) pushed, in read order, onto a bounded FIFO. A forwarding
//! task pops slots in that order and waits on each one, so the output keeps the
//! archive order no matter which preprocessing task finishes first.
//!
//! ```text
//! BlockReader ──► filter ──► slot FIFO (bounded) ──► forwarder ──► output
//!                   │            ▲
//!                   └─► spawn preprocess ─┘ (fills its slot)
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use chainarchive_core::error::ArchiveError;
use chainarchive_core::gate::Gate;
use chainarchive_core::handler::Preprocessor;
use chainarchive_core::reader::BlockReader;
use chainarchive_core::shutter::Shutter;
use chainarchive_core::types::{Block, BlockRef, PreprocessedBlock};

use crate::metrics::SourceMetrics;

type Slot = oneshot::Receiver<PreprocessedBlock>;

pub(crate) struct Pipeline {
    pub(crate) filename: String,
    pub(crate) start_block: u64,
    pub(crate) stop_block: Option<u64>,
    /// Blocks are skipped until this one is read; it is delivered.
    pub(crate) resume_cursor: Option<BlockRef>,
    pub(crate) concurrency: usize,
    pub(crate) gate: Option<Arc<dyn Gate>>,
    pub(crate) preprocessor: Option<Arc<dyn Preprocessor>>,
    pub(crate) shutter: Arc<Shutter>,
    pub(crate) metrics: Arc<SourceMetrics>,
}

impl Pipeline {
    /// Stream every admitted block of `reader` into `output`, in read order.
    ///
    /// Returns once the forwarder has flushed everything, or as soon as the
    /// shutter fires. A read error is returned as a decode error.
    pub(crate) async fn run(
        self,
        mut reader: Box<dyn BlockReader>,
        output: mpsc::Sender<PreprocessedBlock>,
    ) -> Result<(), ArchiveError> {
        let mut armed = self.resume_cursor.is_none();

        let (slots_tx, slots_rx) = mpsc::channel::<Slot>(self.concurrency);
        let forwarder = tokio::spawn(forward_in_order(slots_rx, output, Arc::clone(&self.shutter)));

        loop {
            if self.shutter.is_terminating() {
                return Ok(());
            }

            let read = tokio::select! {
                biased;
                _ = self.shutter.terminating() => return Ok(()),
                read = reader.read() => read,
            };
            let block = match read {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => {
                    return Err(ArchiveError::Decode {
                        filename: self.filename.clone(),
                        reason: e.to_string(),
                    })
                }
            };
            self.metrics.block_read();

            if block.number < self.start_block || self.stop_block.is_some_and(|stop| block.number > stop) {
                self.metrics.block_skipped();
                continue;
            }

            if !armed {
                match &self.resume_cursor {
                    Some(cursor) if cursor.id == block.id => {
                        debug!(block = %block, "resume cursor reached");
                        armed = true;
                    }
                    Some(cursor) => {
                        debug!(block = %block, cursor = %cursor, "skipping block until resume cursor is seen");
                        self.metrics.block_skipped();
                        continue;
                    }
                    None => armed = true,
                }
            }

            if let Some(gate) = &self.gate {
                if !gate.pass(&block) {
                    debug!(block = %block, "gate not passed, dropping block");
                    self.metrics.block_skipped();
                    continue;
                }
            }

            let (slot_tx, slot_rx) = oneshot::channel();
            tokio::select! {
                biased;
                _ = self.shutter.terminating() => return Ok(()),
                sent = slots_tx.send(slot_rx) => {
                    if sent.is_err() {
                        // forwarder is gone, nothing will read further slots
                        return Ok(());
                    }
                }
            }
            self.preprocess(block, slot_tx);
        }

        drop(slots_tx);
        forwarder
            .await
            .map_err(|e| ArchiveError::Other(format!("forwarder for {}: {e}", self.filename)))
    }

    fn preprocess(&self, block: Block, slot: oneshot::Sender<PreprocessedBlock>) {
        let Some(preprocessor) = self.preprocessor.clone() else {
            let _ = slot.send(PreprocessedBlock { block, obj: None });
            return;
        };
        let shutter = Arc::clone(&self.shutter);

        tokio::spawn(async move {
            let obj = tokio::select! {
                biased;
                _ = shutter.terminating() => return,
                res = preprocessor.preprocess(&block) => match res {
                    Ok(obj) => obj,
                    Err(e) => {
                        shutter.shutdown(Some(ArchiveError::Preprocess {
                            block: block.to_string(),
                            reason: e.to_string(),
                        }));
                        return;
                    }
                },
            };
            debug!(block = %block, "block preprocessed");
            // receiver gone means the pipeline is shutting down
            let _ = slot.send(PreprocessedBlock { block, obj: Some(obj) });
        });
    }
}

/// Drain slots in push order, waiting on each, and forward the results.
///
/// Dropping `output` on return closes the file's queue for the sink.
async fn forward_in_order(
    mut slots: mpsc::Receiver<Slot>,
    output: mpsc::Sender<PreprocessedBlock>,
    shutter: Arc<Shutter>,
) {
    loop {
        let slot = tokio::select! {
            biased;
            _ = shutter.terminating() => return,
            slot = slots.recv() => match slot {
                Some(slot) => slot,
                None => return,
            },
        };

        let preprocessed = tokio::select! {
            biased;
            _ = shutter.terminating() => return,
            res = slot => match res {
                Ok(preprocessed) => preprocessed,
                // preprocessing failed or was cancelled
                Err(_) => return,
            },
        };

        tokio::select! {
            biased;
            _ = shutter.terminating() => return,
            sent = output.send(preprocessed) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
