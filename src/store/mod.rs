//! Persistence capabilities.
//!
//! Provides:
//! - Segment storage used for resume and final concatenation
//! - Key-value storage for queue state

pub mod kv;
pub mod segment;

pub use kv::{JsonFileStore, KeyValueStore, MemoryKeyValueStore};
pub use segment::{DirSegmentStore, MemorySegmentStore, SegmentStore};
