//! Concatenating a finished task's segments into one media file.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::fs::{make_unique_filename, segment_name};
use crate::queue::{task_group, Task};
use crate::store::SegmentStore;

/// What a merge produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub path: PathBuf,
    pub segments: usize,
    pub bytes: u64,
}

/// Base name of a task's output file.
pub fn output_name(task: &Task) -> &str {
    task.custom_settings
        .custom_filename
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(&task.title)
}

/// Read every segment of the task's range back from `store` in playlist
/// order and write them to `output`.
///
/// The file is written next to its destination and renamed into place, so a
/// failed merge leaves no partial output.
pub async fn merge_task(
    store: &dyn SegmentStore,
    task: &Task,
    output: &Path,
) -> Result<MergeReport> {
    let group = task_group(task.id);
    let range = task.custom_settings.range_start..task.custom_settings.range_end;
    let temp = output.with_extension("part");

    let mut file = tokio::fs::File::create(&temp).await?;
    let mut bytes = 0u64;
    let mut segments = 0usize;

    for fragment in task.fragments.get(range).unwrap_or_default() {
        let name = segment_name(&group, fragment);
        let data = match store.read(&name).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                drop(file);
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(Error::Storage(format!(
                    "Segment {} of task {} is missing",
                    fragment.stable_index(),
                    task.id
                )));
            }
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e);
            }
        };

        file.write_all(&data).await?;
        bytes += data.len() as u64;
        segments += 1;
    }

    file.flush().await?;
    drop(file);
    tokio::fs::rename(&temp, output).await?;

    tracing::debug!(
        "Merged {} segments ({} bytes) into {}",
        segments,
        bytes,
        output.display()
    );

    Ok(MergeReport {
        path: output.to_path_buf(),
        segments,
        bytes,
    })
}

/// Move a finished stream file to `target`, picking a free name when
/// `target` is taken.
pub async fn finalize_stream(stream: &Path, target: &Path) -> Result<PathBuf> {
    let target = make_unique_filename(target);
    tokio::fs::rename(stream, &target).await?;
    Ok(target)
}
