//! Error types for the chainarchive pipeline.

use thiserror::Error;

/// Errors that can occur while streaming block archives or retrieving payloads.
///
/// Variants carry strings so the error is `Clone`: a terminal error is handed
/// to every task waiting on the [`Shutter`](crate::shutter::Shutter).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Blocks file {filename} not found after {attempts} attempts")]
    FileMissing { filename: String, attempts: u32 },

    #[error("Decoding blocks file {filename}: {reason}")]
    Decode { filename: String, reason: String },

    #[error("Preprocess block {block}: {reason}")]
    Preprocess { block: String, reason: String },

    #[error("Process block failed: {0}")]
    Handler(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Block {id} (#{number}) not found in block archives")]
    BlockNotFound { id: String, number: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Other(String),
}

impl ArchiveError {
    /// Returns `true` if a composing layer may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::FileMissing { .. })
    }

    /// Returns `true` if the error is a cold-recovery miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BlockNotFound { .. })
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_marker() {
        assert!(ArchiveError::Retryable("try later".into()).is_retryable());
        assert!(ArchiveError::FileMissing {
            filename: "0000000500".into(),
            attempts: 3,
        }
        .is_retryable());
        assert!(!ArchiveError::Handler("boom".into()).is_retryable());
        assert!(!ArchiveError::Decode {
            filename: "0000000500".into(),
            reason: "eof".into(),
        }
        .is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = ArchiveError::BlockNotFound { id: "00ab".into(), number: 42 };
        assert_eq!(err.to_string(), "Block 00ab (#42) not found in block archives");
        assert!(err.is_not_found());
    }
}
