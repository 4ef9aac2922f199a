//! Shutdown domain: one cooperative cancellation signal per engine instance.
//!
//! Every task spawned by an engine holds the same [`Shutter`]. Any of them may
//! request termination with an optional error; the first request wins and the
//! error it carried becomes the engine's terminal error. Blocking operations
//! race [`Shutter::terminating`] inside `tokio::select!` so that a stalled peer
//! never delays shutdown.

use std::sync::OnceLock;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::ArchiveError;

#[derive(Debug, Default)]
pub struct Shutter {
    token: CancellationToken,
    terminal: OnceLock<Option<ArchiveError>>,
}

impl Shutter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination. `None` is a clean stop.
    ///
    /// Only the first call has any effect; later calls are ignored.
    pub fn shutdown(&self, err: Option<ArchiveError>) {
        let first = self.terminal.set(err.clone()).is_ok();
        if first {
            match &err {
                Some(e) => tracing::debug!(error = %e, "shutting down"),
                None => tracing::debug!("shutting down cleanly"),
            }
            self.token.cancel();
        }
    }

    /// Non-blocking check.
    pub fn is_terminating(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Future resolving once termination was requested.
    pub fn terminating(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Wait for the terminal state and return the terminal error.
    pub async fn terminated(&self) -> Option<ArchiveError> {
        self.token.cancelled().await;
        self.err()
    }

    /// The terminal error, if termination was requested with one.
    pub fn err(&self) -> Option<ArchiveError> {
        self.terminal.get().cloned().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn first_writer_wins() {
        let shutter = Shutter::new();
        assert!(!shutter.is_terminating());

        shutter.shutdown(Some(ArchiveError::Handler("first".into())));
        shutter.shutdown(Some(ArchiveError::Handler("second".into())));
        shutter.shutdown(None);

        assert!(shutter.is_terminating());
        assert_eq!(shutter.err(), Some(ArchiveError::Handler("first".into())));
    }

    #[test]
    fn clean_stop_has_no_error() {
        let shutter = Shutter::new();
        shutter.shutdown(None);
        shutter.shutdown(Some(ArchiveError::Other("late".into())));
        assert!(shutter.is_terminating());
        assert!(shutter.err().is_none());
    }

    #[tokio::test]
    async fn terminated_wakes_waiters() {
        let shutter = Arc::new(Shutter::new());
        let waiter = {
            let shutter = Arc::clone(&shutter);
            tokio::spawn(async move { shutter.terminated().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutter.shutdown(Some(ArchiveError::Other("stop".into())));

        let err = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(err, Some(ArchiveError::Other("stop".into())));
    }
}
