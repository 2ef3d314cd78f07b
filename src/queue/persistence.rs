//! Durable queue records.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::queue::task::{Task, TaskStatus};
use crate::store::KeyValueStore;

/// Key of the full task collection.
pub const TASKS_KEY: &str = "m3u8_queue_tasks";

/// Key of one task's resume accounting.
pub fn resume_key(id: u64) -> String {
    format!("m3u8_resume_{}", id)
}

/// Every task the manager knows about. Active tasks are stored in `queue`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCollection {
    #[serde(default)]
    pub queue: Vec<Task>,
    #[serde(default)]
    pub completed: Vec<Task>,
    #[serde(default)]
    pub failed: Vec<Task>,
    #[serde(default)]
    pub paused: Vec<Task>,
    #[serde(default)]
    pub task_id_counter: u64,
}

impl TaskCollection {
    /// Move every queued or downloading task to `paused`, so nothing
    /// restarts without an explicit resume.
    pub fn park_unfinished(&mut self) {
        for mut task in self.queue.drain(..) {
            if matches!(task.status, TaskStatus::Queued | TaskStatus::Downloading) {
                task.mark_paused();
            }
            self.paused.push(task);
        }
    }
}

/// Per-task resume accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    #[serde(default)]
    pub downloaded_fragments: Vec<usize>,
    #[serde(default)]
    pub failed_fragments: Vec<usize>,
    #[serde(default)]
    pub progress: u8,
}

impl ResumeRecord {
    pub fn from_task(task: &Task) -> Self {
        Self {
            downloaded_fragments: task.downloaded_fragments.iter().copied().collect(),
            failed_fragments: task.failed_fragments.iter().copied().collect(),
            progress: task.progress,
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        task.downloaded_fragments = self.downloaded_fragments.iter().copied().collect();
        task.failed_fragments = self.failed_fragments.iter().copied().collect();
        task.progress = self.progress;
    }
}

pub fn load_collection(store: &dyn KeyValueStore) -> Result<Option<TaskCollection>> {
    match store.get(TASKS_KEY)? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn save_collection(store: &dyn KeyValueStore, collection: &TaskCollection) -> Result<()> {
    store.set(TASKS_KEY, &serde_json::to_string(collection)?)
}

pub fn load_resume(store: &dyn KeyValueStore, id: u64) -> Result<Option<ResumeRecord>> {
    match store.get(&resume_key(id))? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn save_resume(store: &dyn KeyValueStore, task: &Task) -> Result<()> {
    let record = ResumeRecord::from_task(task);
    store.set(&resume_key(task.id), &serde_json::to_string(&record)?)
}

pub fn clear_resume(store: &dyn KeyValueStore, id: u64) -> Result<()> {
    store.remove(&resume_key(id))
}
