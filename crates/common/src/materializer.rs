//! Directory views presented to the filesystem-call layer.
//!
//! A view is the raw listing with per-child metadata merged in, preceded by
//! synthesized `.` and (below the container root) `..` entries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::cache::{BucketCatalog, ObjectCatalog};
use crate::config::Settings;
use crate::entry::{DirectoryEntry, EntryRef};
use crate::error::{Result, StorageError};
use crate::path::ObjectPath;

#[derive(Debug)]
pub struct DirectoryMaterializer {
    objects: Arc<ObjectCatalog>,
    buckets: Arc<BucketCatalog>,
    settings: Arc<Settings>,
}

impl DirectoryMaterializer {
    pub fn new(
        objects: Arc<ObjectCatalog>,
        buckets: Arc<BucketCatalog>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            objects,
            buckets,
            settings,
        }
    }

    /// Entries of the directory at `path`: `.`, `..` unless `path` is a
    /// container root, then the children in listing order.
    pub async fn list_display_objects(&self, path: &ObjectPath) -> Result<Vec<EntryRef>> {
        let dir = path.to_dir();
        let children = self
            .objects
            .list_objects(&dir, None)
            .await?
            .ok_or_else(|| StorageError::NotFound(dir.to_string()))?;

        let mut merged = Vec::with_capacity(children.len() + 2);
        for child in children {
            merged.push(self.merge_child(&dir, child).await);
        }

        let default_time = merged
            .iter()
            .map(|e| e.last_write_time)
            .min()
            .unwrap_or(self.settings.default_prefix_time);

        let mut view = Vec::with_capacity(merged.len() + 2);
        view.push(Arc::new(self.dot_entry(&dir, ".", default_time).await));
        if let Some(parent) = dir.parent() {
            view.push(Arc::new(self.dot_entry(&parent, "..", default_time).await));
        }
        view.extend(merged);

        debug!(path = %dir, count = view.len(), "materialized directory");
        Ok(view)
    }

    /// Merge cached or fetched metadata into a listed child and mark it
    /// hidden when its lookup is known to fail.
    async fn merge_child(&self, dir: &ObjectPath, child: EntryRef) -> EntryRef {
        let Ok(path) = dir.join(&child.name, child.is_dir()) else {
            return child;
        };

        let resolved = if self.settings.strict_file_timestamp {
            self.objects.head_object(&path).await.ok().flatten()
        } else {
            self.objects.head_from_cache(&path)
        };

        let mut entry = match resolved {
            Some(meta) => {
                trace!(path = %path, "merged child metadata");
                meta
            }
            None => child,
        };

        if self.objects.is_negative(&path) && !entry.is_hidden() {
            Arc::make_mut(&mut entry).set_hidden();
        }
        entry
    }

    /// A `.` or `..` entry named `name` describing `target`.
    async fn dot_entry(&self, target: &ObjectPath, name: &str, fallback: DateTime<Utc>) -> DirectoryEntry {
        let meta = if target.is_container() {
            self.buckets
                .head_container(target.container())
                .await
                .ok()
                .flatten()
        } else {
            self.objects.head_object(target).await.ok().flatten()
        };

        match meta {
            Some(meta) => meta.renamed(name),
            None => DirectoryEntry::directory(name, fallback),
        }
    }
}
