//! Bounded, self-feeding fragment download engine.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::config::EngineConfig;
use crate::engine::escalation::FailureHandler;
use crate::engine::events::{EngineEvent, EngineState, ResumeStats};
use crate::engine::hooks::FragmentHook;
use crate::engine::retry::RetryPolicy;
use crate::error::{Error, FragmentError, Result};
use crate::events::{EventBus, EventReceiver};
use crate::fetch::{FetchClient, FetchRequest, Headers};
use crate::fs::{generate_group_name, segment_name};
use crate::playlist::Fragment;
use crate::store::SegmentStore;

/// Counters for the current run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub bytes: u64,
    pub duration: f64,
    pub running: usize,
}

/// Outcome of [`FragmentEngine::run`].
#[derive(Debug, Clone)]
pub struct EngineSummary {
    pub state: EngineState,
    pub stats: EngineStats,
    pub failed: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    Pending,
    InFlight,
    Done,
    Failed,
    Stopped,
}

/// Mutable per-fragment state, owned by the engine.
#[derive(Debug)]
struct Slot {
    status: SlotStatus,
    retry_count: u32,
    escalations: u32,
    headers: Headers,
    skip_disk_save: bool,
    token: Option<CancellationToken>,
}

impl Slot {
    fn new() -> Self {
        Self {
            status: SlotStatus::Pending,
            retry_count: 0,
            escalations: 0,
            headers: Headers::new(),
            skip_disk_save: false,
            token: None,
        }
    }
}

struct Run {
    state: EngineState,
    generation: u64,
    fragments: Vec<Arc<Fragment>>,
    slots: Vec<Slot>,
    cursor: usize,
    buffer: Vec<Option<Bytes>>,
    success: usize,
    bytes: u64,
    duration: f64,
    running: usize,
    error_list: BTreeSet<usize>,
    push_index: usize,
    token: CancellationToken,
    all_completed_sent: bool,
}

impl Run {
    fn idle() -> Self {
        Self::new(0, Vec::new())
    }

    fn new(generation: u64, fragments: Vec<Arc<Fragment>>) -> Self {
        let n = fragments.len();
        Self {
            state: EngineState::Waiting,
            generation,
            fragments,
            slots: (0..n).map(|_| Slot::new()).collect(),
            cursor: 0,
            buffer: vec![None; n],
            success: 0,
            bytes: 0,
            duration: 0.0,
            running: 0,
            error_list: BTreeSet::new(),
            push_index: 0,
            token: CancellationToken::new(),
            all_completed_sent: false,
        }
    }

    fn failed(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.status == SlotStatus::Failed)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Default)]
struct Hooks {
    decrypt: Option<Arc<dyn FragmentHook>>,
    transcode: Option<Arc<dyn FragmentHook>>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
}

/// What a worker does after a failed attempt.
enum Next {
    Retry(Duration),
    Stop,
}

struct Finished {
    data: Bytes,
    content_type: Option<String>,
}

struct Shared {
    all_fragments: Vec<Fragment>,
    config: EngineConfig,
    policy: RetryPolicy,
    group: String,
    client: Arc<dyn FetchClient>,
    store: Arc<dyn SegmentStore>,
    hooks: RwLock<Hooks>,
    events: EventBus<EngineEvent>,
    run: Mutex<Run>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Downloads one fragment list with at most `thread` fetches in flight.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct FragmentEngine {
    shared: Arc<Shared>,
}

impl FragmentEngine {
    pub fn new(
        fragments: Vec<Fragment>,
        config: EngineConfig,
        client: Arc<dyn FetchClient>,
        store: Arc<dyn SegmentStore>,
    ) -> Self {
        let group = config
            .segment_dir
            .clone()
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(generate_group_name);

        Self {
            shared: Arc::new(Shared {
                all_fragments: fragments,
                policy: config.retry_policy(),
                config,
                group,
                client,
                store,
                hooks: RwLock::new(Hooks::default()),
                events: EventBus::new(),
                run: Mutex::new(Run::idle()),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_decrypt(self, hook: Arc<dyn FragmentHook>) -> Self {
        self.set_decrypt(hook);
        self
    }

    pub fn with_transcode(self, hook: Arc<dyn FragmentHook>) -> Self {
        self.set_transcode(hook);
        self
    }

    pub fn with_failure_handler(self, handler: Arc<dyn FailureHandler>) -> Self {
        self.set_failure_handler(handler);
        self
    }

    /// Decrypt stage, applied to encrypted fragments only.
    pub fn set_decrypt(&self, hook: Arc<dyn FragmentHook>) {
        self.shared.hooks.write().decrypt = Some(hook);
    }

    pub fn set_transcode(&self, hook: Arc<dyn FragmentHook>) {
        self.shared.hooks.write().transcode = Some(hook);
    }

    /// Handler consulted after every `DownloadError`.
    ///
    /// It runs while the engine's state lock is held and must not call back
    /// into the engine.
    pub fn set_failure_handler(&self, handler: Arc<dyn FailureHandler>) {
        self.shared.hooks.write().failure_handler = Some(handler);
    }

    pub fn subscribe(&self) -> EventReceiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Segment group this engine persists into.
    pub fn group(&self) -> &str {
        &self.shared.group
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Start processing `range` of the fragment list (the whole list by
    /// default).
    ///
    /// Fragments are remapped to dense indices starting at 0 wherever their
    /// own index differs from their position.
    /// Returns once the resume check is done and the workers are spawned;
    /// must be called from within a tokio runtime.
    pub async fn start(&self, range: Option<Range<usize>>) -> Result<()> {
        let shared = &self.shared;

        let (generation, fragments) = {
            let mut run = shared.run.lock();
            if run.state == EngineState::Running {
                shared.events.emit(EngineEvent::Error {
                    message: "engine is already running".to_string(),
                });
                return Err(Error::EngineBusy);
            }

            let total = shared.all_fragments.len();
            let range = range.unwrap_or(0..total);
            let start = range.start.min(total);
            let end = range.end.clamp(start, total);
            let fragments: Vec<Arc<Fragment>> = shared.all_fragments[start..end]
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    if f.index == i {
                        Arc::new(f.clone())
                    } else {
                        Arc::new(f.remapped(i))
                    }
                })
                .collect();

            let generation = run.generation + 1;
            *run = Run::new(generation, fragments.clone());
            run.state = EngineState::Running;

            if fragments.is_empty() {
                shared.maybe_finish(&mut run);
                return Ok(());
            }
            (generation, fragments)
        };

        tracing::debug!(
            "Starting {} fragments with {} workers into '{}'",
            fragments.len(),
            shared.config.thread,
            shared.group
        );

        if shared.config.resume_download {
            let stats = shared.check_existing(&fragments).await;
            tracing::debug!(
                "Found {}/{} segments already downloaded",
                stats.downloaded,
                stats.total
            );

            let mut run = shared.run.lock();
            if run.generation != generation || run.state != EngineState::Running {
                return Ok(());
            }
            for &i in &stats.existing {
                run.slots[i].skip_disk_save = true;
            }
            if stats.downloaded > 0 {
                shared.events.emit(EngineEvent::ResumeInfo(stats));
            }
        }

        let count = shared.config.thread.max(1).min(fragments.len());
        let handles: Vec<_> = (0..count)
            .map(|_| tokio::spawn(shared.clone().worker(generation)))
            .collect();
        shared.workers.lock().extend(handles);
        Ok(())
    }

    /// Abort one in-flight fragment, or everything.
    ///
    /// `stop(None)` cancels every fetch and retry wait, sets the state to
    /// `Abort` and stops further claims. `stop(Some(i))` cancels fragment
    /// `i` only; it can later be re-driven.
    pub fn stop(&self, index: Option<usize>) {
        let mut run = self.shared.run.lock();
        match index {
            Some(i) => {
                if let Some(token) = run.slots.get(i).and_then(|slot| slot.token.as_ref()) {
                    token.cancel();
                }
            }
            None => {
                run.token.cancel();
                run.state = EngineState::Abort;
                tracing::debug!("Engine for '{}' aborted", self.shared.group);
            }
        }
    }

    /// Re-drive a failed or stopped fragment with extra headers.
    ///
    /// The fragment gets a fresh retry budget and runs outside the worker
    /// pool. Returns `Ok(false)` when the fragment is not re-drivable or the
    /// engine was never started or was aborted.
    pub fn redrive(&self, index: usize, headers: Headers) -> Result<bool> {
        let shared = &self.shared;
        let generation = {
            let mut run = shared.run.lock();
            if index >= run.slots.len() {
                return Err(Error::FragmentOutOfRange(index));
            }
            if matches!(run.state, EngineState::Waiting | EngineState::Abort) {
                return Ok(false);
            }
            let slot = &mut run.slots[index];
            if !matches!(slot.status, SlotStatus::Failed | SlotStatus::Stopped) {
                return Ok(false);
            }
            slot.status = SlotStatus::InFlight;
            slot.retry_count = 0;
            slot.headers.extend(headers);

            if run.state == EngineState::Done {
                run.state = EngineState::Running;
                run.all_completed_sent = false;
            }
            run.generation
        };

        tracing::debug!("Re-driving fragment {}", index);
        let handle = tokio::spawn(shared.clone().process_owned(index, generation));
        shared.workers.lock().push(handle);
        Ok(true)
    }

    /// Wait until every spawned worker and re-drive has exited.
    pub async fn wait(&self) {
        loop {
            let handles = std::mem::take(&mut *self.shared.workers.lock());
            if handles.is_empty() {
                break;
            }
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    tracing::warn!("Fragment worker ended abnormally: {}", e);
                }
            }
        }
    }

    /// Start and wait for the run to wind down.
    pub async fn run(&self, range: Option<Range<usize>>) -> Result<EngineSummary> {
        self.start(range).await?;
        self.wait().await;
        Ok(self.summary())
    }

    pub fn summary(&self) -> EngineSummary {
        let run = self.shared.run.lock();
        EngineSummary {
            state: run.state,
            stats: Self::stats_of(&run),
            failed: run.failed(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.run.lock().state
    }

    pub fn stats(&self) -> EngineStats {
        Self::stats_of(&self.shared.run.lock())
    }

    fn stats_of(run: &Run) -> EngineStats {
        EngineStats {
            total: run.slots.len(),
            success: run.success,
            failed: run.failed().len(),
            bytes: run.bytes,
            duration: run.duration,
            running: run.running,
        }
    }

    /// Fragments that exhausted their retries and have not since succeeded.
    pub fn error_list(&self) -> Vec<usize> {
        self.shared.run.lock().error_list.iter().copied().collect()
    }

    /// Snapshot of the per-fragment payloads.
    pub fn buffer(&self) -> Vec<Option<Bytes>> {
        self.shared.run.lock().buffer.clone()
    }

    /// Fragments of the active range, with dense indices.
    pub fn fragments(&self) -> Vec<Arc<Fragment>> {
        self.shared.run.lock().fragments.clone()
    }

    /// Delete this engine's persisted segments unless `keep_segments` is set.
    pub async fn cleanup_segments(&self) -> Result<usize> {
        if self.shared.config.keep_segments {
            return Ok(0);
        }
        let removed = self.shared.store.list_and_delete(&self.shared.group).await?;
        tracing::debug!("Cleaned up {} segments of '{}'", removed, self.shared.group);
        Ok(removed)
    }
}

impl Shared {
    async fn check_existing(&self, fragments: &[Arc<Fragment>]) -> ResumeStats {
        let mut stats = ResumeStats {
            total: fragments.len(),
            ..Default::default()
        };

        for fragment in fragments {
            let name = segment_name(&self.group, fragment);
            let exists = match self.store.exists(&name).await {
                Ok(exists) => exists,
                Err(e) => {
                    tracing::warn!("Failed to check segment {}: {}", name, e);
                    false
                }
            };
            if exists {
                stats.existing.push(fragment.index);
            } else {
                stats.missing.push(fragment.index);
            }
        }

        stats.downloaded = stats.existing.len();
        stats
    }

    async fn worker(self: Arc<Self>, generation: u64) {
        while let Some(index) = self.claim_next(generation) {
            self.process(index, generation).await;
        }
    }

    async fn process_owned(self: Arc<Self>, index: usize, generation: u64) {
        self.process(index, generation).await;
    }

    fn claim_next(&self, generation: u64) -> Option<usize> {
        let mut run = self.run.lock();
        if run.generation != generation || run.state != EngineState::Running {
            return None;
        }
        while run.cursor < run.slots.len() {
            let index = run.cursor;
            run.cursor += 1;
            if run.slots[index].status == SlotStatus::Pending {
                run.slots[index].status = SlotStatus::InFlight;
                return Some(index);
            }
        }
        None
    }

    /// Drive one fragment through fetch, retries and the pipeline until it
    /// settles or is stopped.
    async fn process(&self, index: usize, generation: u64) {
        let (fragment, token) = {
            let mut run = self.run.lock();
            if run.generation != generation {
                return;
            }
            let token = run.token.child_token();
            run.slots[index].token = Some(token.clone());
            (run.fragments[index].clone(), token)
        };

        loop {
            let headers = {
                let mut run = self.run.lock();
                if run.generation != generation {
                    return;
                }
                run.running += 1;
                self.events.emit(EngineEvent::Start {
                    fragment: fragment.clone(),
                });
                run.slots[index].headers.clone()
            };

            match self.attempt(&fragment, headers, &token).await {
                Ok(finished) => {
                    self.complete(&fragment, generation, finished).await;
                    return;
                }
                Err(error) => match self.on_failure(&fragment, generation, error) {
                    Next::Retry(delay) => {
                        if delay.is_zero() {
                            continue;
                        }
                        tokio::select! {
                            _ = token.cancelled() => {
                                self.stopped_while_waiting(&fragment, generation);
                                return;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    Next::Stop => return,
                },
            }
        }
    }

    async fn attempt(
        &self,
        fragment: &Arc<Fragment>,
        headers: Headers,
        token: &CancellationToken,
    ) -> std::result::Result<Finished, FragmentError> {
        let (data, content_type) = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FragmentError::Aborted),
            fetched = self.fetch_body(fragment, headers) => fetched?,
        };

        let data = self.run_pipeline(fragment, data).await?;
        Ok(Finished { data, content_type })
    }

    async fn fetch_body(
        &self,
        fragment: &Arc<Fragment>,
        headers: Headers,
    ) -> std::result::Result<(Bytes, Option<String>), FragmentError> {
        let request = FetchRequest::get(&fragment.url).with_headers(headers);
        let response = self.client.fetch(request).await?;
        if !response.is_success() {
            return Err(FragmentError::Http {
                status: response.status,
            });
        }

        let total = response.content_length;
        let content_type = response.content_type;
        let mut body = response.body;
        let mut data = BytesMut::new();
        let mut received = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            data.extend_from_slice(&chunk);
            self.events.emit(EngineEvent::ItemProgress {
                fragment: fragment.clone(),
                done: false,
                received,
                total,
                chunk: Some(chunk),
            });
        }

        self.events.emit(EngineEvent::ItemProgress {
            fragment: fragment.clone(),
            done: true,
            received,
            total,
            chunk: None,
        });
        Ok((data.freeze(), content_type))
    }

    async fn run_pipeline(
        &self,
        fragment: &Arc<Fragment>,
        data: Bytes,
    ) -> std::result::Result<Bytes, FragmentError> {
        let (decrypt, transcode) = {
            let hooks = self.hooks.read();
            (hooks.decrypt.clone(), hooks.transcode.clone())
        };

        self.events.emit(EngineEvent::RawBuffer {
            fragment: fragment.clone(),
            data: data.clone(),
        });

        let data = match decrypt {
            Some(hook) if fragment.encrypted => hook
                .apply(data, fragment)
                .await
                .map_err(|e| FragmentError::Pipeline(format!("decrypt: {}", e)))?,
            _ => data,
        };
        self.events.emit(EngineEvent::DecryptedData {
            fragment: fragment.clone(),
            data: data.clone(),
        });

        match transcode {
            Some(hook) => hook
                .apply(data, fragment)
                .await
                .map_err(|e| FragmentError::Pipeline(format!("transcode: {}", e))),
            None => Ok(data),
        }
    }

    async fn complete(&self, fragment: &Arc<Fragment>, generation: u64, finished: Finished) {
        let index = fragment.index;
        let name = segment_name(&self.group, fragment);

        let skip_disk_save = {
            let run = self.run.lock();
            if run.generation != generation {
                return;
            }
            run.slots[index].skip_disk_save
        };

        if skip_disk_save {
            tracing::debug!("Segment {} already on disk, not saving", name);
        } else if self.config.save_segments {
            match self.store.write(&name, finished.data.clone()).await {
                Ok(()) => tracing::debug!("Saved segment {}", name),
                Err(e) => tracing::warn!("Failed to save segment {}: {}", name, e),
            }
        }

        let mut run = self.run.lock();
        if run.generation != generation {
            return;
        }
        run.running = run.running.saturating_sub(1);

        let slot = &mut run.slots[index];
        slot.status = SlotStatus::Done;
        slot.retry_count = 0;
        slot.token = None;

        run.buffer[index] = Some(finished.data.clone());
        run.success += 1;
        run.bytes += finished.data.len() as u64;
        run.duration += fragment.duration;
        run.error_list.remove(&index);

        self.events.emit(EngineEvent::Completed {
            fragment: fragment.clone(),
            data: finished.data,
            content_type: finished.content_type,
        });

        self.advance_push(&mut run);
        self.maybe_finish(&mut run);
    }

    fn on_failure(&self, fragment: &Arc<Fragment>, generation: u64, error: FragmentError) -> Next {
        let index = fragment.index;
        let mut run = self.run.lock();
        if run.generation != generation {
            return Next::Stop;
        }
        run.running = run.running.saturating_sub(1);

        if error.is_abort() {
            Self::mark_stopped(&mut run, index);
            tracing::debug!("Fragment {} stopped", index);
            self.events.emit(EngineEvent::Stop {
                fragment: fragment.clone(),
            });
            return Next::Stop;
        }

        let retries = run.slots[index].retry_count;
        if self.policy.should_retry(retries) {
            let attempt = retries + 1;
            run.slots[index].retry_count = attempt;
            let delay = self.policy.delay_for(attempt);

            tracing::debug!(
                "Fragment {} failed ({}), retry {}/{} in {:?}",
                index,
                error,
                attempt,
                self.policy.max_retries,
                delay
            );
            self.events.emit(EngineEvent::RetryAttempt {
                fragment: fragment.clone(),
                attempt,
                max: self.policy.max_retries,
                error,
            });
            return Next::Retry(delay);
        }

        tracing::warn!(
            "Fragment {} failed after {} retries: {}",
            index,
            self.policy.max_retries,
            error
        );
        self.events.emit(EngineEvent::DownloadError {
            fragment: fragment.clone(),
            error: error.clone(),
        });
        run.error_list.insert(index);

        let handler = self.hooks.read().failure_handler.clone();
        if let Some(handler) = handler {
            let stage = run.slots[index].escalations;
            if let Some(headers) = handler.on_download_error(fragment, &error, stage) {
                let slot = &mut run.slots[index];
                slot.escalations += 1;
                slot.headers.extend(headers);
                return Next::Retry(Duration::ZERO);
            }
        }

        let slot = &mut run.slots[index];
        slot.status = SlotStatus::Failed;
        slot.token = None;

        self.advance_push(&mut run);
        self.maybe_finish(&mut run);
        Next::Stop
    }

    fn stopped_while_waiting(&self, fragment: &Arc<Fragment>, generation: u64) {
        let mut run = self.run.lock();
        if run.generation != generation {
            return;
        }
        Self::mark_stopped(&mut run, fragment.index);
        tracing::debug!("Fragment {} stopped during retry wait", fragment.index);
        self.events.emit(EngineEvent::Stop {
            fragment: fragment.clone(),
        });
    }

    fn mark_stopped(run: &mut Run, index: usize) {
        let slot = &mut run.slots[index];
        slot.status = SlotStatus::Stopped;
        slot.token = None;
    }

    /// Push the contiguous prefix of settled fragments, skipping failures.
    fn advance_push(&self, run: &mut Run) {
        if !self.config.sequential_push {
            return;
        }
        while run.push_index < run.slots.len() {
            let i = run.push_index;
            match run.slots[i].status {
                SlotStatus::Done => {
                    if let Some(data) = run.buffer[i].clone() {
                        self.events.emit(EngineEvent::SequentialPush {
                            fragment: run.fragments[i].clone(),
                            data,
                        });
                    }
                }
                SlotStatus::Failed => {}
                _ => break,
            }
            run.push_index += 1;
        }
    }

    /// Emit `AllCompleted` once every slot is done or failed.
    fn maybe_finish(&self, run: &mut Run) {
        if run.all_completed_sent {
            return;
        }
        let settled = run
            .slots
            .iter()
            .all(|slot| matches!(slot.status, SlotStatus::Done | SlotStatus::Failed));
        if !settled {
            return;
        }

        run.state = EngineState::Done;
        run.all_completed_sent = true;
        let failed = run.failed();

        tracing::debug!(
            "All {} fragments of '{}' settled, {} failed",
            run.slots.len(),
            self.group,
            failed.len()
        );
        self.events.emit(EngineEvent::AllCompleted {
            buffer: run.buffer.clone(),
            fragments: run.fragments.clone(),
            failed,
        });
    }
}
