//! chainarchive-storage: object stores and payload cache for ChainArchive.
//!
//! Backends:
//! - [`memory`]: in-memory archive store (tests, tooling)
//! - [`local`]: archive files in a local directory
//! - [`cache`]: in-memory two-budget payload cache

pub mod cache;
pub mod local;
pub mod memory;

pub use cache::MemoryPayloadCache;
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
