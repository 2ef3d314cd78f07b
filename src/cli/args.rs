//! Command-line argument definitions using clap.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::playlist::Fragment;
use crate::queue::TaskConfig;

/// Resumable M3U8/HLS downloader CLI.
#[derive(Parser, Debug)]
#[command(
    name = "m3u8-downloader",
    version,
    about = "Download M3U8/HLS streams with a resumable task queue",
    long_about = "Downloads the fragments of one or more M3U8 playlists with bounded \
                  concurrency, retries and AES-128 decryption, then merges each into a \
                  single .ts file.\n\n\
                  Interrupted tasks are kept and can be continued with --resume."
)]
pub struct Args {
    /// Playlist URL(s) to download.
    pub urls: Vec<String>,

    /// Path to configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Base directory for downloads.
    #[arg(short = 'd', long = "directory")]
    pub directory: Option<PathBuf>,

    /// Directory for persisted queue state.
    #[arg(long = "state-dir", env = "M3U8_STATE_DIR")]
    pub state_directory: Option<PathBuf>,

    /// Fragment workers per task.
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Tasks downloading at once (1-10).
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// Retries per fragment.
    #[arg(long)]
    pub retries: Option<u32>,

    /// AES-128 key as 32 hex chars or base64, overriding the playlist key.
    #[arg(long, env = "M3U8_KEY")]
    pub key: Option<String>,

    /// AES-128 IV as 32 hex chars, overriding the playlist IV.
    #[arg(long)]
    pub iv: Option<String>,

    /// First fragment index to download.
    #[arg(long)]
    pub range_start: Option<usize>,

    /// Fragment index to stop before (0 means the end).
    #[arg(long)]
    pub range_end: Option<usize>,

    /// Write fragments to the output file in order as they arrive.
    #[arg(long)]
    pub stream: bool,

    /// Task title, also the output file name.
    #[arg(long)]
    pub title: Option<String>,

    /// Output file name, overriding the title.
    #[arg(short = 'o', long = "output")]
    pub filename: Option<String>,

    /// Browser user agent string.
    #[arg(short = 'a', long = "user-agent", env = "M3U8_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Resume paused and failed tasks from a previous run.
    #[arg(long)]
    pub resume: bool,

    /// List known tasks and exit.
    #[arg(long)]
    pub list: bool,

    /// Forget completed tasks.
    #[arg(long)]
    pub clear_completed: bool,

    /// Delete segment files once a task is merged.
    #[arg(long)]
    pub no_keep_segments: bool,

    /// Hide progress bars.
    #[arg(long, short)]
    pub quiet: bool,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// Merge CLI arguments into an existing config, overriding where specified.
    pub fn merge_into_config(&self, config: &mut Config) {
        if let Some(dir) = &self.directory {
            config.output.directory = Some(dir.clone());
        }

        if let Some(dir) = &self.state_directory {
            config.queue.state_directory = Some(dir.clone());
        }

        if let Some(threads) = self.threads {
            config.engine.thread = threads;
        }

        if let Some(jobs) = self.jobs {
            config.queue.max_concurrent_downloads = jobs;
        }

        if let Some(retries) = self.retries {
            config.engine.max_retries = retries;
        }

        if let Some(user_agent) = &self.user_agent {
            config.output.user_agent = user_agent.clone();
        }

        if self.no_keep_segments {
            config.engine.keep_segments = false;
        }
    }

    /// Task submission for one playlist URL.
    ///
    /// A title given for several URLs gets a numeric suffix per URL.
    pub fn task_config(&self, position: usize, url: &str, fragments: Vec<Fragment>) -> TaskConfig {
        let suffix = |name: &str| {
            if self.urls.len() > 1 {
                format!("{}_{}", name, position + 1)
            } else {
                name.to_string()
            }
        };

        TaskConfig {
            title: self.title.as_deref().map(suffix),
            url: url.to_string(),
            fragments,
            thread: self.threads,
            custom_key: self.key.clone(),
            custom_iv: self.iv.clone(),
            custom_filename: self.filename.as_deref().map(suffix),
            range_start: self.range_start,
            range_end: self.range_end,
            stream_mode: self.stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_merge_into_config() {
        let args = Args::parse_from([
            "m3u8-downloader",
            "-t",
            "4",
            "-j",
            "3",
            "-d",
            "/media",
            "--no-keep-segments",
            "https://a/x.m3u8",
        ]);
        let mut config = Config::default();
        args.merge_into_config(&mut config);

        assert_eq!(config.engine.thread, 4);
        assert_eq!(config.queue.max_concurrent_downloads, 3);
        assert_eq!(config.download_directory(), PathBuf::from("/media"));
        assert!(!config.engine.keep_segments);
        assert_eq!(args.urls, vec!["https://a/x.m3u8".to_string()]);
    }

    #[test]
    fn test_unset_flags_keep_file_values() {
        let args = Args::parse_from(["m3u8-downloader"]);
        let mut config = Config::default();
        config.engine.thread = 12;
        args.merge_into_config(&mut config);
        assert_eq!(config.engine.thread, 12);
        assert!(config.engine.keep_segments);
    }

    #[test]
    fn test_task_config_suffixes_titles_for_several_urls() {
        let args = Args::parse_from([
            "m3u8-downloader",
            "--title",
            "show",
            "--stream",
            "--range-start",
            "2",
            "https://a/1.m3u8",
            "https://a/2.m3u8",
        ]);
        let config = args.task_config(1, "https://a/2.m3u8", Vec::new());

        assert_eq!(config.title.as_deref(), Some("show_2"));
        assert!(config.stream_mode);
        assert_eq!(config.range_start, Some(2));
        assert_eq!(config.range_end, None);
    }
}
