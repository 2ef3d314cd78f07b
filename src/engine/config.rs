//! Per-engine settings.

use serde::{Deserialize, Serialize};

use crate::engine::retry::RetryPolicy;

/// Settings for one fragment engine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of self-feeding workers.
    pub thread: usize,

    /// Retries per fragment after the first attempt.
    pub max_retries: u32,

    /// Delay before each retry, in milliseconds.
    pub retry_delays_ms: Vec<u64>,

    /// Check the segment store for already persisted fragments before starting.
    pub resume_download: bool,

    /// Persist each finished fragment to the segment store.
    pub save_segments: bool,

    /// Keep persisted segments after `cleanup_segments()`.
    pub keep_segments: bool,

    /// Emit `SequentialPush` events in index order.
    pub sequential_push: bool,

    /// Segment group name; generated when absent.
    pub segment_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread: 6,
            max_retries: 3,
            retry_delays_ms: vec![1000, 2000, 3000],
            resume_download: true,
            save_segments: true,
            keep_segments: true,
            sequential_push: false,
            segment_dir: None,
        }
    }
}

impl EngineConfig {
    /// Retry policy described by these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(self.max_retries, &self.retry_delays_ms)
    }
}
