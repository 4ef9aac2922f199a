//! Consumer and preprocessor traits.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ArchiveError;
use crate::types::Block;

/// Downstream consumer of streamed blocks.
///
/// Called once per block, in delivery order, and awaited before the next
/// block is handed over. Any error stops the engine.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process_block(&self, block: &Block, obj: Option<&Value>) -> Result<(), ArchiveError>;
}

/// Adapts a closure into a [`Handler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(&Block, Option<&Value>) -> Result<(), ArchiveError> + Send + Sync,
{
    async fn process_block(&self, block: &Block, obj: Option<&Value>) -> Result<(), ArchiveError> {
        (self.0)(block, obj)
    }
}

/// Per-block transform run concurrently ahead of the handler.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn preprocess(&self, block: &Block) -> Result<Value, ArchiveError>;
}

/// Adapts a closure into a [`Preprocessor`].
pub struct PreprocessFn<F>(pub F);

#[async_trait]
impl<F> Preprocessor for PreprocessFn<F>
where
    F: Fn(&Block) -> Result<Value, ArchiveError> + Send + Sync,
{
    async fn preprocess(&self, block: &Block) -> Result<Value, ArchiveError> {
        (self.0)(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn handler_fn_dispatch() {
        let seen = Arc::new(AtomicU64::new(0));
        let handler = {
            let seen = Arc::clone(&seen);
            HandlerFn(move |blk: &Block, _obj: Option<&Value>| -> Result<(), ArchiveError> {
                seen.store(blk.number, Ordering::Relaxed);
                Ok(())
            })
        };

        let blk = Block::new("00aa", 42, "0029", Utc::now());
        handler.process_block(&blk, None).await.unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 42);
    }

    #[tokio::test]
    async fn preprocess_fn_error_propagates() {
        let pre = PreprocessFn(|blk: &Block| -> Result<Value, ArchiveError> {
            if blk.number % 2 == 0 {
                Ok(serde_json::json!({ "num": blk.number }))
            } else {
                Err(ArchiveError::Other("odd".into()))
            }
        });

        let even = Block::new("00aa", 2, "0001", Utc::now());
        let odd = Block::new("00ab", 3, "00aa", Utc::now());
        assert_eq!(pre.preprocess(&even).await.unwrap()["num"], 2);
        assert!(pre.preprocess(&odd).await.is_err());
    }
}
