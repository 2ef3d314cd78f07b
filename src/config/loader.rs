//! Configuration structures and loading logic.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::fetch::DEFAULT_USER_AGENT;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Queue manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Tasks allowed to download at once (1-10).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Where task state is persisted. Defaults to the platform data directory.
    #[serde(default)]
    pub state_directory: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            state_directory: None,
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base directory for merged files and segments.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Concatenate each finished task's segments into a single file.
    #[serde(default = "default_true")]
    pub merge_segments: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: None,
            user_agent: default_user_agent(),
            merge_segments: true,
        }
    }
}

fn default_max_concurrent() -> usize {
    2
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Config(format!("Configuration file not found: {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;

        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the effective download directory.
    pub fn download_directory(&self) -> PathBuf {
        self.output
            .directory
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Get the directory holding persisted queue state.
    pub fn state_directory(&self) -> PathBuf {
        if let Some(dir) = &self.queue.state_directory {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "m3u8-downloader")
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .unwrap_or_else(|| self.download_directory().join(".m3u8-state"))
    }
}
