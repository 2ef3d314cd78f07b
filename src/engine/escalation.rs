//! Reaction to fragments that exhausted their retries.

use crate::error::FragmentError;
use crate::fetch::Headers;
use crate::playlist::Fragment;

/// Consulted by the engine right after it emits `DownloadError`.
///
/// `stage` counts how many times this handler already re-drove the fragment.
/// Returning headers re-drives it once more with those headers merged into
/// its overrides; `None` leaves it failed.
pub trait FailureHandler: Send + Sync {
    fn on_download_error(
        &self,
        fragment: &Fragment,
        error: &FragmentError,
        stage: u32,
    ) -> Option<Headers>;
}

/// Two-stage header ladder for HTTP failures.
///
/// Stage one asks for the whole body with `Range: bytes=0-`; stage two adds
/// `sec-fetch-mode`/`sec-fetch-site`. Network and pipeline failures are not
/// escalated.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEscalation;

impl FailureHandler for HeaderEscalation {
    fn on_download_error(
        &self,
        fragment: &Fragment,
        error: &FragmentError,
        stage: u32,
    ) -> Option<Headers> {
        if !error.is_http() {
            return None;
        }

        let mut headers = Headers::new();
        match stage {
            0 => {
                headers.insert("Range".to_string(), "bytes=0-".to_string());
            }
            1 => {
                headers.insert("sec-fetch-mode".to_string(), "no-cors".to_string());
                headers.insert("sec-fetch-site".to_string(), "same-site".to_string());
            }
            _ => return None,
        }

        tracing::debug!(
            "Escalating headers for fragment {} (stage {})",
            fragment.index,
            stage + 1
        );
        Some(headers)
    }
}
