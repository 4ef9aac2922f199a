//! chainarchive-core: foundation for the ordered block-archive streaming engine.
//!
//! # Architecture
//!
//! ```text
//! FileSource (chainarchive-source)
//!     ├── ObjectStore        (primary + ordered secondaries)
//!     ├── BlockReaderFactory (archive bytes → Block)
//!     ├── Gate               (admission filter)
//!     ├── Preprocessor       (concurrent per-block transform)
//!     ├── Handler            (downstream consumer)
//!     └── Shutter            (shared cancellation signal)
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod handler;
pub mod payload;
pub mod reader;
pub mod shutter;
pub mod store;
pub mod types;

pub use config::FileSourceConfig;
pub use error::ArchiveError;
pub use gate::{Clock, FixedClock, Gate, GateConfig, SystemClock, TimeThresholdGate};
pub use handler::{Handler, HandlerFn, PreprocessFn, Preprocessor};
pub use payload::{MemoryPayload, MemoryPayloadSetter, Payload, PayloadCache, PayloadSetter};
pub use reader::{BlockReader, BlockReaderFactory, BlockRecord, JsonLinesReaderFactory};
pub use shutter::Shutter;
pub use store::ObjectStore;
pub use types::{Block, BlockRef, PreprocessedBlock};
