//! HTTP fetching.
//!
//! This module provides:
//! - The `FetchClient` capability the engine consumes
//! - A reqwest-backed implementation
//! - Whole-body helpers for playlists and keys

pub mod client;
pub mod types;

pub use client::{HttpFetchClient, DEFAULT_USER_AGENT};
pub use types::{
    fetch_bytes, fetch_text, BodyStream, FetchClient, FetchRequest, FetchResponse, Headers,
};
