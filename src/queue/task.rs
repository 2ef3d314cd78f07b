//! Queue task model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::playlist::Fragment;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-task overrides of the engine defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSettings {
    pub thread: usize,

    /// AES key as hex or base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_key: Option<String>,

    /// IV as hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_iv: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_filename: Option<String>,

    pub range_start: usize,
    pub range_end: usize,

    /// Forward fragments in order as they arrive instead of merging at the end.
    #[serde(default)]
    pub stream_mode: bool,
}

/// Submission for [`crate::queue::QueueManager::add_task`].
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    pub title: Option<String>,
    pub url: String,
    pub fragments: Vec<Fragment>,
    pub thread: Option<usize>,
    pub custom_key: Option<String>,
    pub custom_iv: Option<String>,
    pub custom_filename: Option<String>,
    pub range_start: Option<usize>,
    pub range_end: Option<usize>,
    pub stream_mode: bool,
}

impl TaskConfig {
    pub fn new(url: impl Into<String>, fragments: Vec<Fragment>) -> Self {
        Self {
            url: url.into(),
            fragments,
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_range(mut self, start: Option<usize>, end: Option<usize>) -> Self {
        self.range_start = start;
        self.range_end = end;
        self
    }
}

/// A queue-managed download of one fragment list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,
    pub title: String,
    pub url: String,
    pub fragments: Vec<Fragment>,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default)]
    pub downloaded_fragments: BTreeSet<usize>,
    #[serde(default)]
    pub failed_fragments: BTreeSet<usize>,
    pub custom_settings: TaskSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Build a queued task, applying defaults and clamping the range.
    pub fn new(id: u64, config: TaskConfig, default_thread: usize) -> Self {
        let len = config.fragments.len();
        let range_end = config.range_end.filter(|&end| end > 0).unwrap_or(len).min(len);
        let range_start = config.range_start.unwrap_or(0).min(range_end);
        let now = Utc::now();

        Self {
            id,
            title: config
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| format!("M3U8 task {}", id)),
            url: config.url,
            fragments: config.fragments,
            status: TaskStatus::Queued,
            progress: 0,
            downloaded_fragments: BTreeSet::new(),
            failed_fragments: BTreeSet::new(),
            custom_settings: TaskSettings {
                thread: config.thread.filter(|&t| t > 0).unwrap_or(default_thread),
                custom_key: config.custom_key,
                custom_iv: config.custom_iv,
                custom_filename: config.custom_filename,
                range_start,
                range_end,
                stream_mode: config.stream_mode,
            },
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Number of fragments in the configured range.
    pub fn range_len(&self) -> usize {
        self.custom_settings
            .range_end
            .saturating_sub(self.custom_settings.range_start)
    }

    /// Recompute `progress` from the downloaded set.
    pub fn update_progress(&mut self) {
        let total = self.range_len();
        self.progress = if total == 0 {
            100
        } else {
            let pct = (self.downloaded_fragments.len() as f64 / total as f64 * 100.0).round();
            pct.min(100.0) as u8
        };
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Fragments still to fetch: inside the range and not yet downloaded,
    /// remapped to dense indices with their playlist position kept as the
    /// original index.
    pub fn pending_fragments(&self) -> Vec<Fragment> {
        let range = self.custom_settings.range_start..self.custom_settings.range_end;
        self.fragments
            .iter()
            .enumerate()
            .filter(|(i, _)| range.contains(i) && !self.downloaded_fragments.contains(i))
            .enumerate()
            .map(|(new_index, (i, fragment))| {
                let mut fragment = fragment.remapped(new_index);
                fragment.original_index = Some(i);
                fragment
            })
            .collect()
    }

    /// Whether `other` describes the same download as this task.
    pub fn is_duplicate_of(&self, other: &Task) -> bool {
        self.status != TaskStatus::Failed
            && self.url == other.url
            && self.fragments.len() == other.fragments.len()
    }

    pub fn mark_queued(&mut self) {
        self.status = TaskStatus::Queued;
        self.touch();
    }

    pub fn mark_downloading(&mut self) {
        self.status = TaskStatus::Downloading;
        self.touch();
    }

    pub fn mark_paused(&mut self) {
        self.status = TaskStatus::Paused;
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
        self.error = None;
        self.touch();
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.touch();
    }
}
