//! M3U8 Downloader - resumable HLS fragment downloads in Rust.
//!
//! This library provides a fragment engine and a persistent multi-task queue
//! for downloading M3U8/HLS streams.
//!
//! # Features
//!
//! - Bounded, self-feeding worker pool per download
//! - Per-fragment retries with a configurable delay table
//! - Resume from segments already on disk
//! - AES-128 decryption with custom key/IV overrides
//! - Header escalation for fragments rejected by the CDN
//! - In-order streaming of finished fragments
//! - Task queue with a global concurrency cap, pause/resume and persistence
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use m3u8_downloader::{
//!     load_playlist, DirSegmentStore, EngineConfig, FragmentEngine, HttpFetchClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(HttpFetchClient::new("m3u8-downloader")?);
//!     let playlist = load_playlist(client.as_ref(), "https://example.com/live.m3u8").await?;
//!
//!     let engine = FragmentEngine::new(
//!         playlist.fragments,
//!         EngineConfig::default(),
//!         client,
//!         Arc::new(DirSegmentStore::new("segments")),
//!     );
//!     let summary = engine.run(None).await?;
//!     println!("{} fragments failed", summary.failed.len());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetch;
pub mod fs;
pub mod output;
pub mod playlist;
pub mod queue;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use config::Config;
pub use engine::{
    EngineConfig, EngineEvent, EngineState, EngineSummary, FragmentEngine, HeaderEscalation,
    KeyedDecryptHook, RetryPolicy,
};
pub use error::{Error, FragmentError, Result};
pub use events::{EventBus, EventReceiver};
pub use fetch::{FetchClient, HttpFetchClient};
pub use playlist::{load_playlist, Fragment};
pub use queue::{QueueEvent, QueueManager, Task, TaskConfig, TaskStatus};
pub use store::{DirSegmentStore, JsonFileStore, KeyValueStore, SegmentStore};
