//! Configuration module for the m3u8-downloader.
//!
//! This module handles:
//! - Loading configuration from TOML files
//! - Configuration validation

pub mod loader;
pub mod validation;

pub use loader::{Config, OutputConfig, QueueConfig};
pub use validation::{validate_concurrency, validate_config, validate_retries, validate_thread};
