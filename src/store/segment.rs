//! Segment persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::fs::sanitize_filename;

/// Durable storage for downloaded segments, addressed as `{group}/{file}`.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Whether a complete segment with this name has been persisted.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Persist a segment, replacing any previous content.
    async fn write(&self, name: &str, data: Bytes) -> Result<()>;

    /// Read a persisted segment back.
    ///
    /// Stores that cannot read back return `Ok(None)`.
    async fn read(&self, name: &str) -> Result<Option<Bytes>> {
        let _ = name;
        Ok(None)
    }

    /// Delete every segment in a group, returning how many were removed.
    async fn list_and_delete(&self, group: &str) -> Result<usize>;
}

/// Split `group/file` into validated components.
fn split_name(name: &str) -> Result<(String, String)> {
    let (group, file) = name
        .split_once('/')
        .ok_or_else(|| Error::InvalidSegmentName(format!("missing group in '{}'", name)))?;
    Ok((sanitize_filename(group)?, sanitize_filename(file)?))
}

/// Segment store rooted at a directory: one sub-directory per group.
#[derive(Debug, Clone)]
pub struct DirSegmentStore {
    root: PathBuf,
}

impl DirSegmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let (group, file) = split_name(name)?;
        Ok(self.root.join(group).join(file))
    }
}

#[async_trait]
impl SegmentStore for DirSegmentStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn write(&self, name: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(name)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::Storage(format!("no parent for {}", path.display())))?;
        tokio::fs::create_dir_all(parent).await?;

        // Write-then-rename so a half-written file never counts as existing.
        let tmp = parent.join(format!(".{}.part", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_and_delete(&self, group: &str) -> Result<usize> {
        let dir = self.root.join(sanitize_filename(group)?);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        let _ = tokio::fs::remove_dir(&dir).await;

        tracing::debug!("Removed {} segment files from {}", removed, dir.display());
        Ok(removed)
    }
}

/// In-memory segment store.
#[derive(Debug, Default)]
pub struct MemorySegmentStore {
    segments: Mutex<BTreeMap<String, Bytes>>,
    writes: Mutex<Vec<String>>,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a segment without recording a write.
    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.segments.lock().insert(name.into(), data.into());
    }

    /// Names passed to `write`, in call order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    /// Number of stored segments.
    pub fn len(&self) -> usize {
        self.segments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.lock().is_empty()
    }
}

#[async_trait]
impl SegmentStore for MemorySegmentStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.segments.lock().contains_key(name))
    }

    async fn write(&self, name: &str, data: Bytes) -> Result<()> {
        split_name(name)?;
        self.writes.lock().push(name.to_string());
        self.segments.lock().insert(name.to_string(), data);
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<Bytes>> {
        Ok(self.segments.lock().get(name).cloned())
    }

    async fn list_and_delete(&self, group: &str) -> Result<usize> {
        let prefix = format!("{}/", group);
        let mut segments = self.segments.lock();
        let before = segments.len();
        segments.retain(|name, _| !name.starts_with(&prefix));
        Ok(before - segments.len())
    }
}
