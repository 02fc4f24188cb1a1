//! Local shadow files mirroring remote objects.
//!
//! Each object maps to `<root>/<container>/<sha256(key)>`, so any key can be
//! stored without escaping and two keys never collide on case-insensitive
//! filesystems.

use std::fs::FileTimes as StdFileTimes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::entry::{DirectoryEntry, FileTimes};
use crate::error::Result;
use crate::path::ObjectPath;

/// Size and modification time of a local shadow file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalInfo {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// What to do with a shadow file before serving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Local copy already matches the remote object
    Reuse,
    /// Remote object is empty; create or truncate the local copy
    Truncate,
    Download,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    pub files: usize,
    pub dirs: usize,
}

#[derive(Debug, Clone)]
pub struct ShadowStore {
    root: PathBuf,
}

impl ShadowStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of the shadow file for `path`.
    pub fn path_for(&self, path: &ObjectPath) -> PathBuf {
        let digest = Sha256::digest(path.to_file().key().as_bytes());
        self.root.join(path.container()).join(hex::encode(digest))
    }

    pub async fn local_info(&self, local: &Path) -> Result<Option<LocalInfo>> {
        match tokio::fs::metadata(local).await {
            Ok(meta) => Ok(Some(LocalInfo {
                size: meta.len(),
                modified: DateTime::<Utc>::from(meta.modified()?),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare a local copy with the remote entry.
    ///
    /// Times are compared at millisecond precision, the finest resolution
    /// every supported filesystem keeps.
    pub fn sync_action(local: Option<&LocalInfo>, remote: &DirectoryEntry) -> SyncAction {
        if let Some(local) = local {
            if local.size == remote.size && same_instant(local.modified, remote.last_write_time) {
                return SyncAction::Reuse;
            }
        }
        if remote.size == 0 {
            SyncAction::Truncate
        } else {
            SyncAction::Download
        }
    }

    /// Create or truncate the file, creating its directory as needed.
    ///
    /// A concurrent prune may remove an empty container directory between
    /// the two steps, so a missing parent is recreated once.
    pub async fn create_empty(&self, local: &Path) -> Result<()> {
        let mut retried = false;
        loop {
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::File::create(local).await {
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && !retried => {
                    debug!(path = %local.display(), "shadow directory vanished, retrying");
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
        trace!(path = %local.display(), "created empty shadow file");
        Ok(())
    }

    /// Stamp the file with the remote write time. The access time is set to
    /// now so pruning sees the file as freshly used.
    pub async fn set_times(&self, local: &Path, times: &FileTimes) -> Result<()> {
        let local = local.to_path_buf();
        let accessed = SystemTime::now();
        let modified = SystemTime::from(times.last_write);
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::OpenOptions::new().write(true).open(&local)?;
            file.set_times(
                StdFileTimes::new()
                    .set_accessed(accessed)
                    .set_modified(modified),
            )
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(())
    }

    /// Move a shadow file. Returns `false` when there was nothing to move.
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<bool> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a shadow file. Returns `false` when it did not exist.
    pub async fn remove(&self, local: &Path) -> Result<bool> {
        match tokio::fs::remove_file(local).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete shadow files last used before `threshold`, then container
    /// directories left empty.
    pub async fn prune(&self, threshold: DateTime<Utc>) -> Result<PruneSummary> {
        let root = self.root.clone();
        let threshold = SystemTime::from(threshold);
        let summary = tokio::task::spawn_blocking(move || prune_blocking(&root, threshold))
            .await
            .map_err(std::io::Error::other)??;
        if summary.files > 0 || summary.dirs > 0 {
            debug!(files = summary.files, dirs = summary.dirs, "pruned shadow files");
        }
        Ok(summary)
    }
}

fn same_instant(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.timestamp_millis() == b.timestamp_millis()
}

fn prune_blocking(root: &Path, threshold: SystemTime) -> std::io::Result<PruneSummary> {
    let mut summary = PruneSummary::default();
    let containers = match std::fs::read_dir(root) {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summary),
        Err(e) => return Err(e),
    };

    for container in containers {
        let container = container?;
        if !container.file_type()?.is_dir() {
            continue;
        }

        let files = match std::fs::read_dir(container.path()) {
            Ok(files) => files,
            Err(e) if is_race(&e) => {
                debug!(path = %container.path().display(), error = %e, "skipping shadow directory");
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut remaining = 0;
        for file in files {
            let file = file?;
            match prune_file(&file.path(), threshold) {
                Ok(true) => summary.files += 1,
                Ok(false) => remaining += 1,
                Err(e) if is_race(&e) => {
                    debug!(path = %file.path().display(), error = %e, "skipping shadow file");
                }
                Err(e) => return Err(e),
            }
        }

        if remaining == 0 {
            match std::fs::remove_dir(container.path()) {
                Ok(()) => summary.dirs += 1,
                Err(e) if is_race(&e) => {
                    debug!(path = %container.path().display(), error = %e, "shadow directory in use");
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(summary)
}

/// Remove `path` if it is a file last used before `threshold`.
fn prune_file(path: &Path, threshold: SystemTime) -> std::io::Result<bool> {
    let meta = std::fs::metadata(path)?;
    let last_used = meta.accessed().or_else(|_| meta.modified())?;
    if meta.is_file() && last_used < threshold {
        std::fs::remove_file(path)?;
        return Ok(true);
    }
    Ok(false)
}

/// Errors caused by a materialization running alongside the prune walk.
fn is_race(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENOTEMPTY)
}
