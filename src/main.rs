//! M3U8 Downloader - CLI entry point.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{fmt, EnvFilter};

use m3u8_downloader::{
    cli::Args,
    config::{validate_config, Config},
    error::{exit_codes, Error, Result},
    fetch::HttpFetchClient,
    fs::{ensure_dir, make_unique_filename, segment_root, task_output_path},
    output::{
        create_spinner, finalize_stream, merge_task, output_name, print_banner,
        print_config_summary, print_error, print_info, print_queue_status, print_run_stats,
        print_success, print_task_list, print_warning, RunStats, TaskProgress,
    },
    playlist::load_playlist,
    queue::{task_group, QueueEvent, QueueManager, Task, TaskStatus},
    store::{DirSegmentStore, JsonFileStore, SegmentStore},
};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            print_error(&format!("{}", e));
            match e {
                Error::Config(_) | Error::ConfigValidation { .. } | Error::MissingConfig(_) => {
                    ExitCode::from(exit_codes::CONFIG_ERROR as u8)
                }
                Error::Http { .. }
                | Error::M3U8(_)
                | Error::Fragment(_)
                | Error::Reqwest(_)
                | Error::InvalidKey(_) => ExitCode::from(exit_codes::DOWNLOAD_ERROR as u8),
                _ => ExitCode::from(exit_codes::UNEXPECTED_ERROR as u8),
            }
        }
    }
}

async fn run() -> Result<i32> {
    // Parse CLI arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt().with_env_filter(filter).with_target(false).init();

    if !args.quiet {
        print_banner();
    }

    // Load configuration
    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        if !args.urls.is_empty() {
            print_info("No configuration file found, using defaults");
        }
        Config::default()
    };

    // Merge CLI arguments into config
    args.merge_into_config(&mut config);

    // Validate configuration
    validate_config(&config)?;

    if !args.quiet && !args.list {
        print_config_summary(&config);
    }

    // Set up stores and client
    let state_dir = config.state_directory();
    let kv = Arc::new(JsonFileStore::new(&state_dir)?);
    let segment_dir = segment_root(&config);
    ensure_dir(&segment_dir)?;
    let segments = Arc::new(DirSegmentStore::new(segment_dir));
    let client = Arc::new(HttpFetchClient::new(&config.output.user_agent)?);

    let queue = QueueManager::new(
        client.clone(),
        segments.clone(),
        kv,
        config.engine.clone(),
        config.queue.max_concurrent_downloads,
    );

    if args.clear_completed {
        let removed = queue.clear_completed();
        print_info(&format!("Cleared {} completed tasks", removed));
    }

    if args.list {
        print_task_list(&queue.tasks());
        print_queue_status(&queue.status());
        return Ok(exit_codes::SUCCESS);
    }

    let mut rx = queue.subscribe();
    let mut watched: HashSet<u64> = HashSet::new();
    let mut stats = RunStats::default();

    // Resume tasks from a previous run
    if args.resume {
        let resumable: Vec<u64> = queue
            .tasks()
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Paused | TaskStatus::Failed))
            .map(|t| t.id)
            .collect();
        if resumable.is_empty() {
            print_info("No paused or failed tasks to resume");
        } else {
            print_info(&format!("Resuming {} tasks", resumable.len()));
        }
        watched.extend(resumable);
        queue.resume_all();
    }

    // Load playlists and enqueue
    for (position, url) in args.urls.iter().enumerate() {
        let spinner = create_spinner(&format!("Loading playlist {}", url));
        let loaded = load_playlist(client.as_ref(), url).await;
        spinner.finish_and_clear();

        let playlist = match loaded {
            Ok(playlist) => playlist,
            Err(e) => {
                print_error(&format!("Failed to load {}: {}", url, e));
                stats.tasks_failed += 1;
                continue;
            }
        };

        if !args.quiet {
            print_info(&format!(
                "{}: {} fragments, {:.0}s",
                url,
                playlist.fragments.len(),
                playlist.duration()
            ));
        }

        match queue.try_add_task(args.task_config(position, url, playlist.fragments)) {
            Ok(task) => {
                watched.insert(task.id);
            }
            Err(e) => print_warning(&format!("Skipping {}: {}", url, e)),
        }
    }

    if watched.is_empty() {
        if args.urls.is_empty() && !args.resume && !args.clear_completed {
            print_info("Nothing to do. Pass a playlist URL, or --resume / --list.");
        }
        return Ok(if stats.has_failures() {
            exit_codes::SOME_TASKS_FAILED
        } else {
            exit_codes::SUCCESS
        });
    }

    let started = Instant::now();
    let mut driver = Driver {
        config: &config,
        segments: segments.as_ref(),
        progress: TaskProgress::new(args.quiet),
        streams: HashMap::new(),
        stats,
    };

    let mut interrupted = false;
    while !watched.is_empty() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                driver.progress.println("Interrupted, pausing tasks...");
                queue.pause_all();
                interrupted = true;
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                if let Some(id) = driver.handle(event).await {
                    watched.remove(&id);
                }
            }
        }
    }

    driver.close_streams().await;
    print_run_stats(&driver.stats, &queue.status(), started.elapsed());

    if interrupted {
        print_info("Run again with --resume to continue");
        Ok(exit_codes::ABORT)
    } else if driver.stats.has_failures() {
        Ok(exit_codes::SOME_TASKS_FAILED)
    } else {
        print_success("All tasks finished");
        Ok(exit_codes::SUCCESS)
    }
}

/// Output file receiving a stream-mode task's fragments in order.
struct StreamFile {
    path: PathBuf,
    file: tokio::fs::File,
    fragments: usize,
}

/// Turns queue events into progress, files and statistics.
struct Driver<'a> {
    config: &'a Config,
    segments: &'a DirSegmentStore,
    progress: TaskProgress,
    streams: HashMap<u64, StreamFile>,
    stats: RunStats,
}

impl Driver<'_> {
    /// Apply one event. Returns the task id once that task has settled.
    async fn handle(&mut self, event: QueueEvent) -> Option<u64> {
        match event {
            QueueEvent::TaskStarted(task) | QueueEvent::TaskResumed(task) => {
                self.progress.update(
                    task.id,
                    &task.title,
                    task.downloaded_fragments.len(),
                    task.range_len(),
                );
                None
            }
            QueueEvent::TaskProgress {
                id,
                downloaded,
                total,
                ..
            } => {
                self.progress.update(id, "", downloaded, total);
                None
            }
            QueueEvent::TaskData { id, index, data } => {
                if let Err(e) = self.write_stream(id, data).await {
                    self.progress
                        .println(&format!("Task {} fragment {}: {}", id, index, e));
                }
                None
            }
            QueueEvent::TaskCompleted(task) => {
                self.progress.finish(task.id, "done");
                self.stats.tasks_completed += 1;
                self.stats.fragments_downloaded += task.downloaded_fragments.len();
                if let Err(e) = self.finish_output(&task).await {
                    self.progress
                        .println(&format!("Task {} output failed: {}", task.id, e));
                    self.stats.tasks_failed += 1;
                }
                Some(task.id)
            }
            QueueEvent::TaskFailed { task, error } => {
                self.progress.abandon(task.id, "failed");
                self.progress
                    .println(&format!("Task {} '{}' failed: {}", task.id, task.title, error));
                self.stats.tasks_failed += 1;
                Some(task.id)
            }
            QueueEvent::TaskPaused(task) => {
                self.progress.abandon(task.id, "paused");
                Some(task.id)
            }
            QueueEvent::TaskDeleted(id) => {
                self.progress.abandon(id, "deleted");
                Some(id)
            }
            QueueEvent::TaskAdded(_) | QueueEvent::TaskDuplicate(_) => None,
        }
    }

    async fn write_stream(&mut self, id: u64, data: Bytes) -> Result<()> {
        if !self.streams.contains_key(&id) {
            let path = self.output_path_for(id)?;
            let file = tokio::fs::File::create(&path).await?;
            self.streams.insert(
                id,
                StreamFile {
                    path,
                    file,
                    fragments: 0,
                },
            );
        }

        if let Some(stream) = self.streams.get_mut(&id) {
            stream.file.write_all(&data).await?;
            stream.fragments += 1;
            self.stats.bytes_written += data.len() as u64;
        }
        Ok(())
    }

    /// Stream output is written under the group name and renamed on completion.
    fn output_path_for(&self, id: u64) -> Result<PathBuf> {
        task_output_path(self.config, &task_group(id))
    }

    /// Close the stream file, or merge from the segment store when the
    /// stream does not cover the whole range.
    async fn finish_output(&mut self, task: &Task) -> Result<()> {
        let target = task_output_path(self.config, output_name(task))?;

        if let Some(mut stream) = self.streams.remove(&task.id) {
            stream.file.flush().await?;
            drop(stream.file);
            if stream.fragments == task.range_len() {
                let saved = finalize_stream(&stream.path, &target).await?;
                self.stats.files_written += 1;
                self.progress
                    .println(&format!("Saved {}", saved.display()));
                return self.cleanup(task).await;
            }
            tokio::fs::remove_file(&stream.path).await?;
        }

        if !self.config.output.merge_segments {
            return Ok(());
        }

        let report = merge_task(self.segments, task, &make_unique_filename(&target)).await?;
        self.stats.files_written += 1;
        self.stats.bytes_written += report.bytes;
        self.progress.println(&format!(
            "Saved {} ({} segments)",
            report.path.display(),
            report.segments
        ));
        self.cleanup(task).await
    }

    async fn cleanup(&self, task: &Task) -> Result<()> {
        if self.config.engine.keep_segments {
            return Ok(());
        }
        let removed = self.segments.list_and_delete(&task_group(task.id)).await?;
        tracing::debug!("Removed {} segment files of task {}", removed, task.id);
        Ok(())
    }

    async fn close_streams(&mut self) {
        for (_, mut stream) in self.streams.drain() {
            if let Err(e) = stream.file.flush().await {
                tracing::warn!("Failed to flush {}: {}", stream.path.display(), e);
            }
        }
    }
}
