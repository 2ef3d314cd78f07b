//! Path and directory management.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;
use crate::fs::naming::{sanitize_path_component, with_extension};

/// Name of the directory (under the output directory) holding segment groups.
pub const SEGMENTS_DIR: &str = "segments";

/// Root directory for the segment store.
pub fn segment_root(config: &Config) -> PathBuf {
    config.download_directory().join(SEGMENTS_DIR)
}

/// Output file for a finished task.
pub fn task_output_path(config: &Config, title: &str) -> Result<PathBuf> {
    let name = sanitize_path_component(title)?;
    Ok(config
        .download_directory()
        .join(with_extension(&name, "ts")))
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
