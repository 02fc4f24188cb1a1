//! Per-object metadata and per-directory listing caches.
//!
//! Lookups report absence as `Ok(None)` and cache it negatively. Backend
//! failures during a lookup are cached negatively as well and then
//! returned to the caller.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::api::{ApiClient, ListResult};
use crate::cache::ttl::{TtlCache, TtlCacheStats};
use crate::config::Settings;
use crate::entry::{DirectoryEntry, EntryRef, FileTimes, PROP_ETAG, PROP_LAST_MODIFIED};
use crate::error::{Result, StorageError};
use crate::path::{ObjectPath, SEPARATOR};

#[derive(Debug, Clone, Serialize)]
pub struct ObjectCatalogStats {
    pub heads: TtlCacheStats,
    pub listings: TtlCacheStats,
}

#[derive(Debug)]
pub struct ObjectCatalog {
    client: Arc<dyn ApiClient>,
    settings: Arc<Settings>,
    heads: TtlCache<ObjectPath, EntryRef>,
    listings: TtlCache<ObjectPath, Vec<EntryRef>>,
}

impl ObjectCatalog {
    pub fn new(client: Arc<dyn ApiClient>, settings: Arc<Settings>) -> Self {
        Self {
            client,
            settings,
            heads: TtlCache::new("object-head"),
            listings: TtlCache::new("object-list"),
        }
    }

    /// Metadata for a file or directory.
    ///
    /// Directories without a marker object are confirmed by finding them in
    /// the parent's listing.
    pub async fn head_object(&self, path: &ObjectPath) -> Result<Option<EntryRef>> {
        if path.is_container() {
            return Err(StorageError::InvalidPath(format!(
                "{} is a container, not an object",
                path
            )));
        }

        if self.heads.is_negative(path) {
            trace!(path = %path, "head negative hit");
            return Ok(None);
        }
        if let Some(entry) = self.heads.get_positive(path) {
            trace!(path = %path, "head positive hit");
            return Ok(Some(entry));
        }

        if path.is_dir() {
            self.head_directory(path).await
        } else {
            self.head_file(path).await
        }
    }

    async fn head_file(&self, path: &ObjectPath) -> Result<Option<EntryRef>> {
        match self.client.head_object(path).await {
            Ok(Some(entry)) => Ok(Some(self.store_head(path, entry))),
            Ok(None) => {
                debug!(path = %path, "object not found");
                self.heads.add_negative(path.clone());
                Ok(None)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "head object failed");
                self.heads.add_negative(path.clone());
                Err(e)
            }
        }
    }

    async fn head_directory(&self, path: &ObjectPath) -> Result<Option<EntryRef>> {
        match self.client.head_object(path).await {
            Ok(Some(entry)) => return Ok(Some(self.store_head(path, entry))),
            Ok(None) => {}
            Err(e) => debug!(path = %path, error = %e, "directory marker lookup failed"),
        }

        let Some(parent) = path.parent() else {
            return Ok(None);
        };
        let name = path.name();

        let listing = match self.list_objects(&parent, None).await {
            Ok(listing) => listing,
            Err(e) => {
                self.heads.add_negative(path.clone());
                return Err(e);
            }
        };

        let found = listing
            .unwrap_or_default()
            .into_iter()
            .find(|e| e.is_dir() && e.name == name);

        match found {
            Some(entry) => {
                debug!(path = %path, "directory found in parent listing");
                self.heads.set_positive(path.clone(), entry.clone());
                Ok(Some(entry))
            }
            None => {
                debug!(path = %path, "directory not found in parent listing");
                self.heads.add_negative(path.clone());
                Ok(None)
            }
        }
    }

    fn store_head(&self, path: &ObjectPath, entry: DirectoryEntry) -> EntryRef {
        // a marker object stands for the directory itself
        let entry = if path.is_dir() {
            entry.renamed(path.name())
        } else {
            DirectoryEntry {
                name: path.name().to_string(),
                ..entry
            }
        };
        let entry = Arc::new(entry);
        self.heads.set_positive(path.clone(), entry.clone());
        entry
    }

    /// Children of a directory, `Ok(None)` if the listing is known to fail.
    ///
    /// With `limit` the result is truncated and a fetched result is not
    /// cached, since it is not the whole directory.
    pub async fn list_objects(
        &self,
        path: &ObjectPath,
        limit: Option<usize>,
    ) -> Result<Option<Vec<EntryRef>>> {
        let dir = path.to_dir();

        if self.listings.is_negative(&dir) {
            trace!(path = %dir, "listing negative hit");
            return Ok(None);
        }
        if let Some(mut entries) = self.listings.get_positive(&dir) {
            trace!(path = %dir, count = entries.len(), "listing positive hit");
            if let Some(limit) = limit {
                entries.truncate(limit);
            }
            return Ok(Some(entries));
        }

        if limit.is_some() {
            return self.fetch_listing(&dir, limit).await.map(Some);
        }

        match self.fetch_listing(&dir, None).await {
            Ok(entries) => {
                self.listings.set_positive(dir, entries.clone());
                Ok(Some(entries))
            }
            Err(e) => {
                warn!(path = %dir, error = %e, "list objects failed");
                self.listings.add_negative(dir);
                Err(e)
            }
        }
    }

    async fn fetch_listing(&self, dir: &ObjectPath, limit: Option<usize>) -> Result<Vec<EntryRef>> {
        let raw = self
            .client
            .list_objects(dir, Some(SEPARATOR), limit)
            .await?;
        let entries = self.build_listing(dir, raw, limit);
        debug!(path = %dir, count = entries.len(), "fetched listing");
        Ok(entries)
    }

    /// Turn a delimited listing into entries.
    ///
    /// Prefixes become directories and come first. A file with the same
    /// name as a prefix is dropped. Prefix entries borrow the earliest file
    /// timestamp of the listing; the directory's own marker does not count.
    fn build_listing(&self, dir: &ObjectPath, raw: ListResult, limit: Option<usize>) -> Vec<EntryRef> {
        let max = match (self.settings.max_display_objects, limit) {
            (0, None) => usize::MAX,
            (0, Some(l)) => l,
            (m, None) => m,
            (m, Some(l)) => m.min(l),
        };
        let dir_key = dir.key();
        let child_name = |key: &'_ str| -> Option<String> {
            let rest = key.strip_prefix(dir_key)?;
            let name = rest.trim_end_matches(SEPARATOR);
            (!name.is_empty() && !name.contains(SEPARATOR)).then(|| name.to_string())
        };

        let prefix_time = raw
            .objects
            .iter()
            .filter(|o| o.key != dir_key)
            .map(|o| o.last_modified)
            .min()
            .unwrap_or(self.settings.default_prefix_time);

        let mut entries: Vec<EntryRef> = Vec::new();
        let mut dir_names = HashSet::new();

        for prefix in &raw.prefixes {
            let Some(name) = child_name(prefix) else {
                continue;
            };
            dir_names.insert(name.clone());
            if entries.len() >= max || self.ignored(dir, &name, true) {
                continue;
            }
            entries.push(Arc::new(DirectoryEntry::directory(name, prefix_time)));
        }

        for object in &raw.objects {
            if entries.len() >= max {
                break;
            }
            if object.key == dir_key {
                continue;
            }
            let Some(name) = child_name(&object.key) else {
                continue;
            };
            if object.key.ends_with(SEPARATOR) || dir_names.contains(&name) {
                continue;
            }
            if self.ignored(dir, &name, false) {
                continue;
            }

            let mut entry = DirectoryEntry::file(
                name,
                object.size,
                FileTimes::uniform(object.last_modified),
            );
            entry.extra.insert(
                PROP_LAST_MODIFIED.to_string(),
                format_time(object.last_modified),
            );
            if let Some(etag) = &object.etag {
                entry.extra.insert(PROP_ETAG.to_string(), etag.clone());
            }
            entries.push(Arc::new(entry));
        }

        entries
    }

    fn ignored(&self, dir: &ObjectPath, name: &str, is_dir: bool) -> bool {
        match dir.join(name, is_dir) {
            Ok(child) => self.settings.is_ignored(&child.fs_path()),
            // names that cannot be addressed are never shown
            Err(_) => true,
        }
    }

    /// Drop the head and listing entries for `path` and its parent.
    pub fn delete_cache(&self, path: &ObjectPath) -> usize {
        let removed = self.heads.delete_by_key(path) + self.listings.delete_by_key(&path.to_dir());
        debug!(path = %path, removed, "invalidated object cache");
        removed
    }

    /// Cached metadata only, never fetched.
    pub fn head_from_cache(&self, path: &ObjectPath) -> Option<EntryRef> {
        self.heads.get_positive(path)
    }

    /// True if a lookup of `path` is known to fail.
    pub fn is_negative(&self, path: &ObjectPath) -> bool {
        self.heads.is_negative(path)
    }

    pub fn delete_older_than(&self, threshold: DateTime<Utc>) -> usize {
        self.heads.delete_older_than(threshold) + self.listings.delete_older_than(threshold)
    }

    pub fn clear(&self) -> usize {
        self.heads.clear() + self.listings.clear()
    }

    pub fn stats(&self) -> ObjectCatalogStats {
        ObjectCatalogStats {
            heads: self.heads.stats(),
            listings: self.listings.stats(),
        }
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
