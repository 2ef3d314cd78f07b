//! Error types for the m3u8-downloader application.

use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // Playlist errors
    #[error("M3U8 processing error: {0}")]
    M3U8(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    // Fetch errors
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Fragment failed: {0}")]
    Fragment(#[from] FragmentError),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid segment name (path traversal attempt): {0}")]
    InvalidSegmentName(String),

    // Engine errors
    #[error("Engine is already running; stop it first")]
    EngineBusy,

    #[error("Fragment index {0} is out of range")]
    FragmentOutOfRange(usize),

    // Queue errors
    #[error("Duplicate task for {url}")]
    DuplicateTask { url: String },

    #[error("Task not found: {0}")]
    TaskNotFound(u64),

    #[error("Task {id} cannot be {action} while {status}")]
    InvalidTaskState {
        id: u64,
        action: &'static str,
        status: String,
    },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP client errors
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // URL parsing errors
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Failure of a single fragment's fetch/decrypt/transcode cycle.
///
/// Cloneable so it can travel inside engine events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    /// Non-2xx response.
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// Connection, DNS or body-stream failure.
    #[error("network error: {0}")]
    Network(String),

    /// Decrypt or transcode hook failure.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// The fetch was cancelled via `stop()`.
    #[error("aborted")]
    Aborted,
}

impl FragmentError {
    /// Whether the failure came from an HTTP status.
    pub fn is_http(&self) -> bool {
        matches!(self, FragmentError::Http { .. })
    }

    /// Whether the failure is a cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, FragmentError::Aborted)
    }

    /// Everything except cancellation goes through the retry ladder.
    pub fn is_retryable(&self) -> bool {
        !self.is_abort()
    }
}

impl From<reqwest::Error> for FragmentError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FragmentError::Http {
                status: status.as_u16(),
            },
            None => FragmentError::Network(err.to_string()),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Process exit codes.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const ABORT: i32 = 1;
    pub const CONFIG_ERROR: i32 = 3;
    pub const DOWNLOAD_ERROR: i32 = 4;
    pub const UNEXPECTED_ERROR: i32 = 5;
    pub const SOME_TASKS_FAILED: i32 = 6;
}
