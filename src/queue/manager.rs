//! Multi-task queue with a global concurrency cap.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    EngineConfig, EngineEvent, FragmentEngine, HeaderEscalation, KeyedDecryptHook,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, EventReceiver};
use crate::fetch::FetchClient;
use crate::playlist::{parse_iv, parse_key};
use crate::queue::persistence::{self, TaskCollection};
use crate::queue::task::{Task, TaskConfig, TaskStatus};
use crate::store::{KeyValueStore, SegmentStore};

/// Bounds for `max_concurrent_downloads`.
pub const MIN_CONCURRENT: usize = 1;
pub const MAX_CONCURRENT: usize = 10;

/// Segment group used by a task's engines.
pub fn task_group(id: u64) -> String {
    format!("m3u8_task_{}", id)
}

/// Events emitted by the queue manager.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    TaskAdded(Task),
    TaskStarted(Task),
    TaskProgress {
        id: u64,
        progress: u8,
        downloaded: usize,
        total: usize,
    },
    /// Stream mode: next fragment in playlist order.
    TaskData {
        id: u64,
        index: usize,
        data: Bytes,
    },
    TaskCompleted(Task),
    TaskFailed {
        task: Task,
        error: String,
    },
    TaskPaused(Task),
    TaskResumed(Task),
    TaskDeleted(u64),
    TaskDuplicate(Task),
}

/// Counters for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub max_concurrent_downloads: usize,
    pub queue_length: usize,
    pub active_downloads: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub paused_tasks: usize,
}

struct ActiveTask {
    task: Task,
    run_id: u64,
    engine: Option<FragmentEngine>,
    cancel: CancellationToken,
}

struct QueueState {
    max_concurrent: usize,
    queue: VecDeque<Task>,
    active: BTreeMap<u64, ActiveTask>,
    completed: BTreeMap<u64, Task>,
    failed: BTreeMap<u64, Task>,
    paused: BTreeMap<u64, Task>,
    task_id_counter: u64,
    run_counter: u64,
}

impl QueueState {
    fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.queue
            .iter()
            .chain(self.active.values().map(|a| &a.task))
            .chain(self.paused.values())
            .chain(self.failed.values())
            .chain(self.completed.values())
    }

    fn collection(&self) -> TaskCollection {
        TaskCollection {
            queue: self
                .queue
                .iter()
                .chain(self.active.values().map(|a| &a.task))
                .cloned()
                .collect(),
            completed: self.completed.values().cloned().collect(),
            failed: self.failed.values().cloned().collect(),
            paused: self.paused.values().cloned().collect(),
            task_id_counter: self.task_id_counter,
        }
    }

    fn status_of(&self, id: u64) -> Option<TaskStatus> {
        self.all_tasks().find(|t| t.id == id).map(|t| t.status)
    }
}

struct Inner {
    client: Arc<dyn FetchClient>,
    segments: Arc<dyn SegmentStore>,
    kv: Arc<dyn KeyValueStore>,
    engine_defaults: EngineConfig,
    events: EventBus<QueueEvent>,
    state: Mutex<QueueState>,
}

/// Runs several fragment engines as tasks under one concurrency cap.
///
/// Every operation persists the task collection. Scheduling spawns tokio
/// tasks, so mutating methods must be called from within a runtime.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl QueueManager {
    /// Create a manager, restoring any persisted tasks as paused.
    pub fn new(
        client: Arc<dyn FetchClient>,
        segments: Arc<dyn SegmentStore>,
        kv: Arc<dyn KeyValueStore>,
        engine_defaults: EngineConfig,
        max_concurrent: usize,
    ) -> Self {
        let mut state = QueueState {
            max_concurrent: max_concurrent.clamp(MIN_CONCURRENT, MAX_CONCURRENT),
            queue: VecDeque::new(),
            active: BTreeMap::new(),
            completed: BTreeMap::new(),
            failed: BTreeMap::new(),
            paused: BTreeMap::new(),
            task_id_counter: 0,
            run_counter: 0,
        };

        match persistence::load_collection(kv.as_ref()) {
            Ok(Some(mut collection)) => {
                collection.park_unfinished();
                state.task_id_counter = collection.task_id_counter;
                state.completed = collection.completed.into_iter().map(|t| (t.id, t)).collect();
                state.failed = collection.failed.into_iter().map(|t| (t.id, t)).collect();
                state.paused = collection.paused.into_iter().map(|t| (t.id, t)).collect();
                tracing::info!(
                    "Restored {} tasks ({} paused)",
                    state.completed.len() + state.failed.len() + state.paused.len(),
                    state.paused.len()
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to restore queue state: {}", e),
        }

        Self {
            inner: Arc::new(Inner {
                client,
                segments,
                kv,
                engine_defaults,
                events: EventBus::new(),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn subscribe(&self) -> EventReceiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Queue a new task. Returns `None` and emits `TaskDuplicate` when an
    /// equivalent unfailed task is already queued, active or completed.
    pub fn add_task(&self, config: TaskConfig) -> Option<Task> {
        self.try_add_task(config).ok()
    }

    /// Like [`add_task`](Self::add_task), reporting a duplicate as
    /// [`Error::DuplicateTask`].
    pub fn try_add_task(&self, config: TaskConfig) -> Result<Task> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let task = Task::new(
            state.task_id_counter + 1,
            config,
            inner.engine_defaults.thread,
        );

        let duplicate = state
            .queue
            .iter()
            .chain(state.active.values().map(|a| &a.task))
            .chain(state.completed.values())
            .any(|existing| existing.is_duplicate_of(&task));
        if duplicate {
            tracing::info!("Skipping duplicate task for {}", task.url);
            let url = task.url.clone();
            inner.events.emit(QueueEvent::TaskDuplicate(task));
            return Err(Error::DuplicateTask { url });
        }

        state.task_id_counter = task.id;
        let id = task.id;
        tracing::info!("Queued task {} '{}'", id, task.title);
        state.queue.push_back(task.clone());
        inner.persist(&state);
        inner.events.emit(QueueEvent::TaskAdded(task));
        inner.process_queue(&mut state);

        let result = state
            .all_tasks()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(Error::TaskNotFound(id));
        result
    }

    pub fn pause_task(&self, id: u64) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let mut task = if let Some(active) = state.active.remove(&id) {
            active.cancel.cancel();
            if let Some(engine) = &active.engine {
                engine.stop(None);
            }
            active.task
        } else if let Some(pos) = state.queue.iter().position(|t| t.id == id) {
            match state.queue.remove(pos) {
                Some(task) => task,
                None => return Err(Error::TaskNotFound(id)),
            }
        } else {
            return Err(inner.not_in_state(&state, id, "paused"));
        };

        task.mark_paused();
        if let Err(e) = persistence::save_resume(inner.kv.as_ref(), &task) {
            tracing::warn!("Failed to save resume data for task {}: {}", id, e);
        }
        tracing::info!("Paused task {}", id);
        state.paused.insert(id, task.clone());
        inner.persist(&state);
        inner.events.emit(QueueEvent::TaskPaused(task));
        inner.process_queue(&mut state);
        Ok(())
    }

    /// Re-queue a paused or failed task, keeping its downloaded fragments.
    pub fn resume_task(&self, id: u64) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let mut task = match state.paused.remove(&id).or_else(|| state.failed.remove(&id)) {
            Some(task) => task,
            None => return Err(inner.not_in_state(&state, id, "resumed")),
        };

        task.mark_queued();
        tracing::info!("Resumed task {}", id);
        state.queue.push_back(task.clone());
        inner.persist(&state);
        inner.events.emit(QueueEvent::TaskResumed(task));
        inner.process_queue(&mut state);
        Ok(())
    }

    /// Re-queue a failed task with a clean failure record.
    pub fn retry_task(&self, id: u64) -> Result<()> {
        {
            let inner = &self.inner;
            let mut state = inner.state.lock();
            let status = state.status_of(id);
            let Some(task) = state.failed.get_mut(&id) else {
                return Err(match status {
                    Some(status) => Error::InvalidTaskState {
                        id,
                        action: "retried",
                        status: status.to_string(),
                    },
                    None => Error::TaskNotFound(id),
                });
            };
            task.failed_fragments.clear();
            task.error = None;
            if let Err(e) = persistence::save_resume(inner.kv.as_ref(), task) {
                tracing::warn!("Failed to save resume data for task {}: {}", id, e);
            }
        }
        self.resume_task(id)
    }

    /// Remove a task in any state, stopping it first if it is running.
    pub fn delete_task(&self, id: u64) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        let mut found = false;
        if let Some(active) = state.active.remove(&id) {
            active.cancel.cancel();
            if let Some(engine) = &active.engine {
                engine.stop(None);
            }
            found = true;
        }
        let before = state.queue.len();
        state.queue.retain(|t| t.id != id);
        found |= state.queue.len() != before;
        found |= state.completed.remove(&id).is_some();
        found |= state.failed.remove(&id).is_some();
        found |= state.paused.remove(&id).is_some();

        if !found {
            return Err(Error::TaskNotFound(id));
        }

        if let Err(e) = persistence::clear_resume(inner.kv.as_ref(), id) {
            tracing::warn!("Failed to clear resume data for task {}: {}", id, e);
        }
        tracing::info!("Deleted task {}", id);
        inner.persist(&state);
        inner.events.emit(QueueEvent::TaskDeleted(id));
        inner.process_queue(&mut state);
        Ok(())
    }

    pub fn pause_all(&self) {
        let ids: Vec<u64> = {
            let state = self.inner.state.lock();
            state
                .active
                .keys()
                .copied()
                .chain(state.queue.iter().map(|t| t.id))
                .collect()
        };
        for id in ids {
            if let Err(e) = self.pause_task(id) {
                tracing::debug!("Pause of task {} skipped: {}", id, e);
            }
        }
    }

    pub fn resume_all(&self) {
        let ids: Vec<u64> = {
            let state = self.inner.state.lock();
            state
                .paused
                .keys()
                .chain(state.failed.keys())
                .copied()
                .collect()
        };
        for id in ids {
            if let Err(e) = self.resume_task(id) {
                tracing::debug!("Resume of task {} skipped: {}", id, e);
            }
        }
    }

    /// Forget all completed tasks. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let mut state = self.inner.state.lock();
        let removed = state.completed.len();
        state.completed.clear();
        self.inner.persist(&state);
        removed
    }

    /// Set the concurrency cap, clamped to [1, 10].
    pub fn set_max_concurrent_downloads(&self, max: usize) {
        let mut state = self.inner.state.lock();
        state.max_concurrent = max.clamp(MIN_CONCURRENT, MAX_CONCURRENT);
        tracing::debug!("Max concurrent downloads set to {}", state.max_concurrent);
        self.inner.process_queue(&mut state);
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock();
        QueueStatus {
            max_concurrent_downloads: state.max_concurrent,
            queue_length: state.queue.len(),
            active_downloads: state.active.len(),
            completed_tasks: state.completed.len(),
            failed_tasks: state.failed.len(),
            paused_tasks: state.paused.len(),
        }
    }

    /// All tasks, most recently updated first.
    pub fn tasks(&self) -> Vec<Task> {
        let state = self.inner.state.lock();
        let mut tasks: Vec<Task> = state.all_tasks().cloned().collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        tasks
    }

    pub fn task(&self, id: u64) -> Option<Task> {
        self.inner.state.lock().all_tasks().find(|t| t.id == id).cloned()
    }
}

impl Inner {
    fn persist(&self, state: &QueueState) {
        if let Err(e) = persistence::save_collection(self.kv.as_ref(), &state.collection()) {
            tracing::warn!("Failed to persist queue state: {}", e);
        }
    }

    fn not_in_state(&self, state: &QueueState, id: u64, action: &'static str) -> Error {
        match state.status_of(id) {
            Some(status) => Error::InvalidTaskState {
                id,
                action,
                status: status.to_string(),
            },
            None => Error::TaskNotFound(id),
        }
    }

    /// Start queued tasks while there is capacity.
    fn process_queue(self: &Arc<Self>, state: &mut QueueState) {
        while state.active.len() < state.max_concurrent {
            let Some(task) = state.queue.pop_front() else {
                break;
            };
            self.start_download(state, task);
        }
    }

    fn start_download(self: &Arc<Self>, state: &mut QueueState, mut task: Task) {
        match persistence::load_resume(self.kv.as_ref(), task.id) {
            Ok(Some(record)) => record.apply_to(&mut task),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to load resume data for task {}: {}", task.id, e),
        }
        task.mark_downloading();

        state.run_counter += 1;
        let run_id = state.run_counter;
        let cancel = CancellationToken::new();
        let id = task.id;
        tracing::info!("Starting task {} '{}'", id, task.title);

        state.active.insert(
            id,
            ActiveTask {
                task,
                run_id,
                engine: None,
                cancel: cancel.clone(),
            },
        );
        self.persist(state);

        tokio::spawn(self.clone().run_task(id, run_id, cancel));
    }

    fn build_engine(&self, task: &Task) -> Result<FragmentEngine> {
        let settings = &task.custom_settings;
        let key = settings.custom_key.as_deref().map(parse_key).transpose()?;
        let iv = settings.custom_iv.as_deref().map(parse_iv).transpose()?;

        let config = EngineConfig {
            thread: settings.thread,
            sequential_push: settings.stream_mode,
            segment_dir: Some(task_group(task.id)),
            ..self.engine_defaults.clone()
        };

        let decrypt = KeyedDecryptHook::aes128().with_key(key).with_iv(iv);
        Ok(FragmentEngine::new(
            task.pending_fragments(),
            config,
            self.client.clone(),
            self.segments.clone(),
        )
        .with_decrypt(Arc::new(decrypt))
        .with_failure_handler(Arc::new(HeaderEscalation)))
    }

    async fn run_task(self: Arc<Self>, id: u64, run_id: u64, cancel: CancellationToken) {
        let built = {
            let state = self.state.lock();
            match state.active.get(&id) {
                Some(active) if active.run_id == run_id => {
                    if active.task.pending_fragments().is_empty() {
                        None
                    } else {
                        Some(self.build_engine(&active.task))
                    }
                }
                _ => return,
            }
        };

        let engine = match built {
            None => {
                self.complete_task(id, run_id);
                return;
            }
            Some(Ok(engine)) => engine,
            Some(Err(e)) => {
                self.fail_task(id, run_id, e.to_string());
                return;
            }
        };

        let mut rx = engine.subscribe();
        {
            let mut state = self.state.lock();
            match state.active.get_mut(&id) {
                Some(active) if active.run_id == run_id && !cancel.is_cancelled() => {
                    active.engine = Some(engine.clone());
                }
                _ => return,
            }
        }

        if let Err(e) = engine.start(None).await {
            self.fail_task(id, run_id, e.to_string());
            return;
        }
        if let Some(task) = self.active_snapshot(id, run_id) {
            self.events.emit(QueueEvent::TaskStarted(task));
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    engine.stop(None);
                    break;
                }
                event = rx.recv() => match event {
                    Some(event) => {
                        if self.handle_engine_event(id, run_id, event) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    fn active_snapshot(&self, id: u64, run_id: u64) -> Option<Task> {
        let state = self.state.lock();
        state
            .active
            .get(&id)
            .filter(|a| a.run_id == run_id)
            .map(|a| a.task.clone())
    }

    /// Apply one engine event to its task. Returns true once the run is over.
    fn handle_engine_event(self: &Arc<Self>, id: u64, run_id: u64, event: EngineEvent) -> bool {
        let mut state = self.state.lock();
        let Some(active) = state.active.get_mut(&id).filter(|a| a.run_id == run_id) else {
            return true;
        };
        let task = &mut active.task;

        match event {
            EngineEvent::Completed { fragment, .. } => {
                let index = fragment.stable_index();
                task.downloaded_fragments.insert(index);
                task.failed_fragments.remove(&index);
                task.update_progress();
                if let Err(e) = persistence::save_resume(self.kv.as_ref(), task) {
                    tracing::warn!("Failed to save resume data for task {}: {}", id, e);
                }
                self.events.emit(QueueEvent::TaskProgress {
                    id,
                    progress: task.progress,
                    downloaded: task.downloaded_fragments.len(),
                    total: task.range_len(),
                });
                false
            }
            EngineEvent::DownloadError { fragment, error } => {
                tracing::debug!(
                    "Task {} fragment {} failed: {}",
                    id,
                    fragment.stable_index(),
                    error
                );
                task.failed_fragments.insert(fragment.stable_index());
                if let Err(e) = persistence::save_resume(self.kv.as_ref(), task) {
                    tracing::warn!("Failed to save resume data for task {}: {}", id, e);
                }
                false
            }
            EngineEvent::SequentialPush { fragment, data } => {
                self.events.emit(QueueEvent::TaskData {
                    id,
                    index: fragment.stable_index(),
                    data,
                });
                false
            }
            EngineEvent::AllCompleted { .. } => {
                let failed = task.failed_fragments.len();
                drop(state);
                if failed == 0 {
                    self.complete_task(id, run_id);
                } else {
                    self.fail_task(id, run_id, format!("{} fragments failed", failed));
                }
                true
            }
            other => {
                tracing::trace!("Task {} engine event: {}", id, other.name());
                false
            }
        }
    }

    fn take_active(state: &mut QueueState, id: u64, run_id: u64) -> Option<Task> {
        match state.active.get(&id) {
            Some(active) if active.run_id == run_id => state.active.remove(&id).map(|a| a.task),
            _ => None,
        }
    }

    fn complete_task(self: &Arc<Self>, id: u64, run_id: u64) {
        let mut state = self.state.lock();
        let Some(mut task) = Self::take_active(&mut state, id, run_id) else {
            return;
        };

        task.mark_completed();
        if let Err(e) = persistence::clear_resume(self.kv.as_ref(), id) {
            tracing::warn!("Failed to clear resume data for task {}: {}", id, e);
        }
        tracing::info!("Task {} '{}' completed", id, task.title);
        state.completed.insert(id, task.clone());
        self.persist(&state);
        self.events.emit(QueueEvent::TaskCompleted(task));
        self.process_queue(&mut state);
    }

    fn fail_task(self: &Arc<Self>, id: u64, run_id: u64, error: String) {
        let mut state = self.state.lock();
        let Some(mut task) = Self::take_active(&mut state, id, run_id) else {
            return;
        };

        tracing::warn!("Task {} '{}' failed: {}", id, task.title, error);
        task.mark_failed(error.clone());
        state.failed.insert(id, task.clone());
        self.persist(&state);
        self.events.emit(QueueEvent::TaskFailed { task, error });
        self.process_queue(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::Fragment;
    use crate::queue::persistence::{resume_key, ResumeRecord};
    use crate::store::{MemoryKeyValueStore, MemorySegmentStore};
    use crate::testing::{MockFetchClient, Outcome};
    use std::time::Duration;

    fn url(task: &str, i: usize) -> String {
        format!("https://cdn.example.com/{}/seg{}.ts", task, i)
    }

    fn fragments(task: &str, n: usize) -> Vec<Fragment> {
        (0..n).map(|i| Fragment::new(i, url(task, i))).collect()
    }

    fn config(task: &str, n: usize) -> TaskConfig {
        TaskConfig::new(format!("https://cdn.example.com/{}.m3u8", task), fragments(task, n))
            .with_title(task)
    }

    fn script(client: &MockFetchClient, task: &str, n: usize, outcome: Outcome) {
        for i in 0..n {
            client.script(&url(task, i), vec![outcome.clone()]);
        }
    }

    fn engine_defaults() -> EngineConfig {
        EngineConfig {
            thread: 2,
            max_retries: 0,
            retry_delays_ms: vec![1],
            ..Default::default()
        }
    }

    fn manager(
        client: &MockFetchClient,
        kv: &Arc<MemoryKeyValueStore>,
        max_concurrent: usize,
    ) -> QueueManager {
        QueueManager::new(
            Arc::new(client.clone()),
            Arc::new(MemorySegmentStore::new()),
            kv.clone(),
            engine_defaults(),
            max_concurrent,
        )
    }

    async fn next_matching<F>(rx: &mut EventReceiver<QueueEvent>, pred: F) -> QueueEvent
    where
        F: Fn(&QueueEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for queue event")
    }

    fn is_completed(id: u64) -> impl Fn(&QueueEvent) -> bool {
        move |e| matches!(e, QueueEvent::TaskCompleted(t) if t.id == id)
    }

    #[tokio::test]
    async fn test_single_slot_runs_tasks_in_order() {
        let client = MockFetchClient::new();
        script(&client, "a", 3, Outcome::slow_body("a", Duration::from_millis(20)));
        script(&client, "b", 2, Outcome::body("b"));
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        let t1 = queue.add_task(config("a", 3)).unwrap();
        let t2 = queue.add_task(config("b", 2)).unwrap();
        assert_eq!(t1.status, TaskStatus::Downloading);
        assert_eq!(t2.status, TaskStatus::Queued);
        assert_eq!(queue.status().active_downloads, 1);
        assert_eq!(queue.status().queue_length, 1);

        next_matching(&mut rx, is_completed(t1.id)).await;
        let status = queue.task(t2.id).unwrap().status;
        assert!(matches!(
            status,
            TaskStatus::Downloading | TaskStatus::Completed
        ));

        next_matching(&mut rx, is_completed(t2.id)).await;
        let done = queue.task(t1.id).unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.downloaded_fragments.len(), 3);
        assert_eq!(queue.status().completed_tasks, 2);
        assert!(kv.get(&resume_key(t1.id)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_task_is_rejected() {
        let client = MockFetchClient::new();
        script(&client, "a", 2, Outcome::Hang);
        script(&client, "b", 2, Outcome::Hang);
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        queue.add_task(config("a", 2)).unwrap();
        let queued = queue.add_task(config("b", 2)).unwrap();
        assert_eq!(queued.status, TaskStatus::Queued);

        assert!(queue.add_task(config("b", 2)).is_none());
        next_matching(&mut rx, |e| matches!(e, QueueEvent::TaskDuplicate(_))).await;
        assert!(matches!(
            queue.try_add_task(config("b", 2)),
            Err(Error::DuplicateTask { .. })
        ));

        // A different fragment count is a different task.
        assert!(queue.add_task(config("b", 3)).is_some());
        assert_eq!(queue.tasks().len(), 3);
        queue.pause_all();
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let client = MockFetchClient::new();
        script(&client, "a", 2, Outcome::Hang);
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 2);
        let mut rx = queue.subscribe();

        let task = queue.add_task(config("a", 2)).unwrap();
        next_matching(&mut rx, |e| matches!(e, QueueEvent::TaskStarted(_))).await;

        queue.pause_task(task.id).unwrap();
        assert_eq!(queue.task(task.id).unwrap().status, TaskStatus::Paused);
        assert_eq!(queue.status().active_downloads, 0);
        assert!(matches!(
            queue.pause_task(task.id),
            Err(Error::InvalidTaskState { .. })
        ));

        script(&client, "a", 2, Outcome::body("x"));
        queue.resume_task(task.id).unwrap();
        next_matching(&mut rx, is_completed(task.id)).await;
        assert!(matches!(queue.resume_task(99), Err(Error::TaskNotFound(99))));
    }

    #[tokio::test]
    async fn test_restore_does_not_auto_resume() {
        let client = MockFetchClient::new();
        script(&client, "a", 1, Outcome::Hang);
        script(&client, "b", 1, Outcome::Hang);
        let kv = Arc::new(MemoryKeyValueStore::new());

        {
            let queue = manager(&client, &kv, 1);
            queue.add_task(config("a", 1)).unwrap();
            queue.add_task(config("b", 1)).unwrap();
        }

        let restored = manager(&client, &kv, 1);
        let status = restored.status();
        assert_eq!(status.active_downloads, 0);
        assert_eq!(status.queue_length, 0);
        assert_eq!(status.paused_tasks, 2);
        assert!(restored
            .tasks()
            .iter()
            .all(|t| t.status == TaskStatus::Paused));

        let next = restored.add_task(config("c", 1)).unwrap();
        assert_eq!(next.id, 3);
        restored.pause_all();
    }

    #[tokio::test]
    async fn test_concurrency_is_clamped() {
        let client = MockFetchClient::new();
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 0);
        assert_eq!(queue.status().max_concurrent_downloads, 1);

        queue.set_max_concurrent_downloads(50);
        assert_eq!(queue.status().max_concurrent_downloads, 10);
    }

    #[tokio::test]
    async fn test_raising_limit_starts_queued_tasks() {
        let client = MockFetchClient::new();
        script(&client, "a", 1, Outcome::Hang);
        script(&client, "b", 1, Outcome::Hang);
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);

        queue.add_task(config("a", 1)).unwrap();
        let b = queue.add_task(config("b", 1)).unwrap();
        assert_eq!(b.status, TaskStatus::Queued);

        queue.set_max_concurrent_downloads(2);
        assert_eq!(queue.task(b.id).unwrap().status, TaskStatus::Downloading);
        queue.pause_all();
        assert_eq!(queue.status().paused_tasks, 2);
    }

    #[tokio::test]
    async fn test_failed_fragments_fail_task_and_retry_requeues() {
        let client = MockFetchClient::new();
        script(&client, "a", 2, Outcome::body("ok"));
        client.script(&url("a", 1), vec![Outcome::Network("reset".to_string())]);
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        let task = queue.add_task(config("a", 2)).unwrap();
        let event =
            next_matching(&mut rx, |e| matches!(e, QueueEvent::TaskFailed { .. })).await;
        if let QueueEvent::TaskFailed { task: failed, error } = event {
            assert_eq!(failed.id, task.id);
            assert!(failed.failed_fragments.contains(&1));
            assert!(failed.downloaded_fragments.contains(&0));
            assert!(error.contains("1 fragments failed"));
        }
        assert_eq!(queue.status().failed_tasks, 1);

        client.script(&url("a", 1), vec![Outcome::body("ok")]);
        queue.retry_task(task.id).unwrap();
        next_matching(&mut rx, is_completed(task.id)).await;

        // Fragment 0 was already downloaded and is not fetched again.
        assert_eq!(client.request_count(&url("a", 0)), 1);
        assert!(matches!(
            queue.retry_task(task.id),
            Err(Error::InvalidTaskState { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_task_frees_slot_for_queued_task() {
        let client = MockFetchClient::new();
        client.script(&url("a", 0), vec![Outcome::Network("reset".to_string())]);
        script(&client, "b", 2, Outcome::body("b"));
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        let t1 = queue.add_task(config("a", 1)).unwrap();
        let t2 = queue.add_task(config("b", 2)).unwrap();
        assert_eq!(t2.status, TaskStatus::Queued);

        next_matching(&mut rx, |e| {
            matches!(e, QueueEvent::TaskFailed { task, .. } if task.id == t1.id)
        })
        .await;
        next_matching(&mut rx, |e| matches!(e, QueueEvent::TaskStarted(t) if t.id == t2.id))
            .await;
        next_matching(&mut rx, is_completed(t2.id)).await;

        assert_eq!(queue.task(t1.id).unwrap().status, TaskStatus::Failed);
        let status = queue.status();
        assert_eq!(status.failed_tasks, 1);
        assert_eq!(status.completed_tasks, 1);
        assert_eq!(status.active_downloads, 0);
    }

    #[tokio::test]
    async fn test_start_skips_fragments_from_resume_record() {
        let client = MockFetchClient::new();
        script(&client, "a", 3, Outcome::body("x"));
        let kv = Arc::new(MemoryKeyValueStore::new());
        let record = ResumeRecord {
            downloaded_fragments: vec![0, 1],
            failed_fragments: vec![],
            progress: 67,
        };
        kv.set(&resume_key(1), &serde_json::to_string(&record).unwrap())
            .unwrap();
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        let task = queue.add_task(config("a", 3)).unwrap();
        next_matching(&mut rx, is_completed(task.id)).await;

        assert_eq!(client.request_count(&url("a", 0)), 0);
        assert_eq!(client.request_count(&url("a", 1)), 0);
        assert_eq!(client.request_count(&url("a", 2)), 1);
    }

    #[tokio::test]
    async fn test_range_limits_fetched_fragments() {
        let client = MockFetchClient::new();
        script(&client, "a", 5, Outcome::body("x"));
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        let task = queue
            .add_task(config("a", 5).with_range(Some(1), Some(3)))
            .unwrap();
        next_matching(&mut rx, is_completed(task.id)).await;

        let fetched: Vec<usize> = (0..5)
            .filter(|&i| client.request_count(&url("a", i)) > 0)
            .collect();
        assert_eq!(fetched, vec![1, 2]);
        let done = queue.task(task.id).unwrap();
        assert_eq!(done.downloaded_fragments.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_delete_active_task() {
        let client = MockFetchClient::new();
        script(&client, "a", 1, Outcome::Hang);
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        let task = queue.add_task(config("a", 1)).unwrap();
        queue.delete_task(task.id).unwrap();
        next_matching(&mut rx, |e| matches!(e, QueueEvent::TaskDeleted(id) if *id == task.id))
            .await;

        assert!(queue.task(task.id).is_none());
        assert!(matches!(queue.delete_task(task.id), Err(Error::TaskNotFound(_))));
        let saved = persistence::load_collection(kv.as_ref()).unwrap().unwrap();
        assert!(saved.queue.is_empty());
    }

    #[tokio::test]
    async fn test_stream_mode_forwards_data_in_order() {
        let client = MockFetchClient::new();
        script(&client, "a", 4, Outcome::body("x"));
        client.script(
            &url("a", 0),
            vec![Outcome::slow_body("first", Duration::from_millis(30))],
        );
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        let mut cfg = config("a", 4);
        cfg.stream_mode = true;
        let task = queue.add_task(cfg).unwrap();

        let mut indices = Vec::new();
        loop {
            match next_matching(&mut rx, |_| true).await {
                QueueEvent::TaskData { index, .. } => indices.push(index),
                QueueEvent::TaskCompleted(t) if t.id == task.id => break,
                _ => {}
            }
        }
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_clear_completed() {
        let client = MockFetchClient::new();
        script(&client, "a", 1, Outcome::body("x"));
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        let task = queue.add_task(config("a", 1)).unwrap();
        next_matching(&mut rx, is_completed(task.id)).await;

        assert_eq!(queue.clear_completed(), 1);
        assert!(queue.tasks().is_empty());
        // Cleared tasks no longer block an identical submission.
        assert!(queue.add_task(config("a", 1)).is_some());
    }

    #[tokio::test]
    async fn test_invalid_key_fails_task() {
        let client = MockFetchClient::new();
        script(&client, "a", 1, Outcome::body("x"));
        let kv = Arc::new(MemoryKeyValueStore::new());
        let queue = manager(&client, &kv, 1);
        let mut rx = queue.subscribe();

        let mut cfg = config("a", 1);
        cfg.custom_key = Some("not-a-key".to_string());
        queue.add_task(cfg).unwrap();

        let event =
            next_matching(&mut rx, |e| matches!(e, QueueEvent::TaskFailed { .. })).await;
        assert!(matches!(event, QueueEvent::TaskFailed { error, .. } if error.contains("key")));
    }
}
