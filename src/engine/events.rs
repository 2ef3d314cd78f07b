//! Events emitted by the fragment engine.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::FragmentError;
use crate::playlist::Fragment;

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Waiting,
    Running,
    Abort,
    Done,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Waiting => "waiting",
            EngineState::Running => "running",
            EngineState::Abort => "abort",
            EngineState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of the pre-start existence check against the segment store.
///
/// Indices are positions in the active (dense) fragment range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeStats {
    pub total: usize,
    pub downloaded: usize,
    pub existing: Vec<usize>,
    pub missing: Vec<usize>,
}

/// Everything an engine reports to its subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A fetch for this fragment is about to be issued.
    Start { fragment: Arc<Fragment> },

    /// Body progress. `chunk` is `None` on the final (`done`) report.
    ItemProgress {
        fragment: Arc<Fragment>,
        done: bool,
        received: u64,
        total: Option<u64>,
        chunk: Option<Bytes>,
    },

    /// Complete body as received.
    RawBuffer { fragment: Arc<Fragment>, data: Bytes },

    /// Body after the decrypt stage.
    DecryptedData { fragment: Arc<Fragment>, data: Bytes },

    /// Fragment finished its pipeline and is stored in the buffer.
    Completed {
        fragment: Arc<Fragment>,
        data: Bytes,
        content_type: Option<String>,
    },

    /// Every fragment in the range is settled.
    AllCompleted {
        buffer: Vec<Option<Bytes>>,
        fragments: Vec<Arc<Fragment>>,
        failed: Vec<usize>,
    },

    /// Next fragment of the contiguous prefix, in index order.
    SequentialPush { fragment: Arc<Fragment>, data: Bytes },

    /// A fetch was cancelled.
    Stop { fragment: Arc<Fragment> },

    /// A failed fragment will be retried.
    RetryAttempt {
        fragment: Arc<Fragment>,
        attempt: u32,
        max: u32,
        error: FragmentError,
    },

    /// A fragment exhausted its retries.
    DownloadError {
        fragment: Arc<Fragment>,
        error: FragmentError,
    },

    /// Some fragments were already present in the segment store.
    ResumeInfo(ResumeStats),

    /// Engine-level misuse, such as starting twice.
    Error { message: String },
}

impl EngineEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Start { .. } => "start",
            EngineEvent::ItemProgress { .. } => "itemProgress",
            EngineEvent::RawBuffer { .. } => "rawBuffer",
            EngineEvent::DecryptedData { .. } => "decryptedData",
            EngineEvent::Completed { .. } => "completed",
            EngineEvent::AllCompleted { .. } => "allCompleted",
            EngineEvent::SequentialPush { .. } => "sequentialPush",
            EngineEvent::Stop { .. } => "stop",
            EngineEvent::RetryAttempt { .. } => "retryAttempt",
            EngineEvent::DownloadError { .. } => "downloadError",
            EngineEvent::ResumeInfo(_) => "resumeInfo",
            EngineEvent::Error { .. } => "error",
        }
    }
}
