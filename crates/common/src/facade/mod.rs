//! The entry point used by the filesystem-call layer.
//!
//! Every operation that creates or downloads a shadow file holds the path
//! lock for the object while doing so. Lookups that find nothing return
//! [`StorageError::NotFound`]; [`StorageError::errno`] gives the code to
//! hand back to the host filesystem.

pub mod events;

pub use events::{CacheReport, IdleSummary, NotifyEvent, NotifyOutcome};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::cache::{BucketCatalog, ObjectCatalog};
use crate::config::Settings;
use crate::entry::{EntryRef, FileTimes};
use crate::error::{Result, StorageError};
use crate::materializer::DirectoryMaterializer;
use crate::path::{ObjectPath, SEPARATOR};
use crate::path_lock::PathLockRegistry;
use crate::shadow::{ShadowStore, SyncAction};
use crate::transfer::{DownloadOperation, TransferCoordinator, UploadOperation};
use crate::worker::WorkerPool;

/// A materialized local copy of a remote object.
#[derive(Debug, Clone)]
pub struct ShadowFile {
    pub local: PathBuf,
    pub entry: EntryRef,
    pub action: SyncAction,
}

#[derive(Debug)]
pub struct StorageFacade {
    client: Arc<dyn ApiClient>,
    settings: Arc<Settings>,
    buckets: Arc<BucketCatalog>,
    objects: Arc<ObjectCatalog>,
    materializer: DirectoryMaterializer,
    transfers: TransferCoordinator,
    locks: Arc<PathLockRegistry>,
    shadow: ShadowStore,
}

impl StorageFacade {
    pub fn new(client: Arc<dyn ApiClient>, pool: Arc<dyn WorkerPool>, settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let buckets = Arc::new(BucketCatalog::new(client.clone(), settings.clone()));
        let objects = Arc::new(ObjectCatalog::new(client.clone(), settings.clone()));
        let materializer =
            DirectoryMaterializer::new(objects.clone(), buckets.clone(), settings.clone());
        let transfers = TransferCoordinator::new(pool, settings.transfer);
        let shadow = ShadowStore::new(settings.shadow_dir.clone());

        Self {
            client,
            settings,
            buckets,
            objects,
            materializer,
            transfers,
            locks: PathLockRegistry::new(),
            shadow,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn shadow(&self) -> &ShadowStore {
        &self.shadow
    }

    pub fn locks(&self) -> &Arc<PathLockRegistry> {
        &self.locks
    }

    pub async fn list_containers(&self) -> Result<Vec<EntryRef>> {
        self.buckets.list_containers().await
    }

    pub async fn head_container(&self, name: &str) -> Result<EntryRef> {
        self.buckets
            .head_container(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    /// Metadata for a container, directory or file.
    pub async fn head_object(&self, path: &ObjectPath) -> Result<EntryRef> {
        if path.is_container() {
            return self.head_container(path.container()).await;
        }
        self.objects
            .head_object(path)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    pub async fn list_objects(&self, path: &ObjectPath, limit: Option<usize>) -> Result<Vec<EntryRef>> {
        self.objects
            .list_objects(path, limit)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.to_dir().to_string()))
    }

    pub async fn list_display_objects(&self, path: &ObjectPath) -> Result<Vec<EntryRef>> {
        self.materializer.list_display_objects(path).await
    }

    /// Write `length` bytes at `offset` of the remote object into `output`.
    pub async fn get_object_and_write_file(
        &self,
        path: &ObjectPath,
        offset: u64,
        length: u64,
        output: &Path,
    ) -> Result<u64> {
        let _lock = self.locks.lock(&path.to_string()).await;
        self.client
            .get_object_range(path, offset, length, output)
            .await
    }

    /// Bring the shadow file for `path` in line with the remote object.
    pub async fn materialize(&self, path: &ObjectPath) -> Result<ShadowFile> {
        if path.is_dir() {
            return Err(StorageError::InvalidPath(format!("{} is a directory", path)));
        }
        let _lock = self.locks.lock(&path.to_string()).await;
        self.materialize_locked(path).await
    }

    async fn materialize_locked(&self, path: &ObjectPath) -> Result<ShadowFile> {
        let entry = self
            .objects
            .head_object(path)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let local = self.shadow.path_for(path);
        let info = self.shadow.local_info(&local).await?;
        let action = ShadowStore::sync_action(info.as_ref(), &entry);
        debug!(path = %path, local = %local.display(), ?action, "materializing");

        match action {
            SyncAction::Reuse => {}
            SyncAction::Truncate => {
                self.shadow.create_empty(&local).await?;
                self.shadow.set_times(&local, &entry.times()).await?;
            }
            SyncAction::Download => {
                self.shadow.create_empty(&local).await?;
                let op = Arc::new(DownloadOperation::new(
                    self.client.clone(),
                    path.clone(),
                    local.clone(),
                    entry.size,
                ));
                if let Err(e) = self.transfers.execute(op, entry.size).await {
                    let _ = self.shadow.remove(&local).await;
                    return Err(e);
                }
                self.shadow.set_times(&local, &entry.times()).await?;
            }
        }

        let size = self
            .shadow
            .local_info(&local)
            .await?
            .map_or(0, |info| info.size);
        if size != entry.size {
            return Err(StorageError::Inconsistent(format!(
                "{}: local size {} does not match remote size {}",
                path, size, entry.size
            )));
        }

        Ok(ShadowFile {
            local,
            entry,
            action,
        })
    }

    /// Upload `source` (or an empty body) to `path` with `times` as metadata.
    pub async fn put_object(
        &self,
        path: &ObjectPath,
        times: &FileTimes,
        source: Option<&Path>,
    ) -> Result<()> {
        let _lock = self.locks.lock(&path.to_string()).await;
        self.put_object_locked(path, times, source).await
    }

    async fn put_object_locked(
        &self,
        path: &ObjectPath,
        times: &FileTimes,
        source: Option<&Path>,
    ) -> Result<()> {
        let size = match source {
            Some(source) => tokio::fs::metadata(source).await?.len(),
            None => 0,
        };
        let op = Arc::new(UploadOperation::new(
            self.client.clone(),
            path.clone(),
            *times,
            source.map(Path::to_path_buf),
        ));

        let result = self.transfers.execute(op, size).await;
        self.objects.delete_cache(path);
        let summary = result?;
        info!(path = %path, size, parts = summary.parts, "uploaded object");
        Ok(())
    }

    /// Delete `path` together with its shadow file.
    ///
    /// A directory has its files deleted first, listing again until none
    /// remain, then its marker. Subdirectories are left in place.
    pub async fn delete_object(&self, path: &ObjectPath) -> Result<()> {
        if path.is_container() {
            return Err(StorageError::InvalidPath(format!("cannot delete {}", path)));
        }
        let _lock = self.locks.lock(&path.to_string()).await;

        let result = self.delete_object_locked(path).await;
        self.objects.delete_cache(path);
        result?;
        info!(path = %path, "deleted object");
        Ok(())
    }

    async fn delete_object_locked(&self, path: &ObjectPath) -> Result<()> {
        if path.is_dir() {
            self.delete_directory_files(path).await?;
        }
        self.client.delete_object(path).await?;
        self.remove_shadow(path).await
    }

    async fn delete_directory_files(&self, dir: &ObjectPath) -> Result<()> {
        let mut previous: Vec<String> = Vec::new();
        loop {
            let listing = self.client.list_objects(dir, Some(SEPARATOR), None).await?;
            let keys: Vec<String> = listing
                .objects
                .into_iter()
                .map(|o| o.key)
                .filter(|key| key != dir.key() && !key.ends_with(SEPARATOR))
                .collect();
            if keys.is_empty() {
                return Ok(());
            }
            if keys == previous {
                return Err(StorageError::Inconsistent(format!(
                    "{}: {} files survived deletion",
                    dir,
                    keys.len()
                )));
            }

            debug!(dir = %dir, count = keys.len(), "deleting directory files");
            self.delete_objects(dir.container(), &keys).await?;
            previous = keys;
        }
    }

    pub async fn delete_objects(&self, container: &str, keys: &[String]) -> Result<()> {
        let result = self.client.delete_objects(container, keys).await;
        for key in keys {
            if let Ok(path) = ObjectPath::new(container, key) {
                self.objects.delete_cache(&path);
                if result.is_ok() {
                    self.remove_shadow(&path).await?;
                }
            }
        }
        result?;
        info!(container, count = keys.len(), "deleted objects");
        Ok(())
    }

    async fn remove_shadow(&self, path: &ObjectPath) -> Result<()> {
        if path.is_dir() {
            return Ok(());
        }
        let local = self.shadow.path_for(path);
        if self.shadow.remove(&local).await? {
            debug!(path = %path, local = %local.display(), "removed shadow file");
        }
        Ok(())
    }

    /// Move `src` to `dst` as copy-then-delete.
    ///
    /// Directories must be empty. For files, the local shadow copy must
    /// agree with the remote object, otherwise unsynced local edits could be
    /// lost and the rename is refused.
    pub async fn rename_object(&self, src: &ObjectPath, dst: &ObjectPath) -> Result<()> {
        if src.is_container() || dst.is_container() {
            return Err(StorageError::InvalidPath(format!(
                "cannot rename {} to {}",
                src, dst
            )));
        }
        let dst = if src.is_dir() {
            dst.to_dir()
        } else {
            dst.to_file()
        };
        let (src_key, dst_key) = (src.to_string(), dst.to_string());
        let _locks = self
            .locks
            .lock_all(&[src_key.as_str(), dst_key.as_str()])
            .await;

        let result = if src.is_dir() {
            self.rename_directory(src, &dst).await
        } else {
            self.rename_file(src, &dst).await
        };

        self.objects.delete_cache(src);
        self.objects.delete_cache(&dst);
        result?;
        info!(from = %src, to = %dst, "renamed object");
        Ok(())
    }

    async fn rename_directory(&self, src: &ObjectPath, dst: &ObjectPath) -> Result<()> {
        let listing = self
            .client
            .list_objects(src, Some(SEPARATOR), Some(2))
            .await?;
        let has_children = !listing.prefixes.is_empty()
            || listing.objects.iter().any(|o| o.key != src.key());
        if has_children {
            return Err(StorageError::DirectoryNotEmpty(src.to_string()));
        }

        let times = match self.objects.head_object(src).await? {
            Some(entry) => entry.times(),
            None => return Err(StorageError::NotFound(src.to_string())),
        };
        self.put_object_locked(dst, &times, None).await?;
        self.client.delete_object(src).await
    }

    async fn rename_file(&self, src: &ObjectPath, dst: &ObjectPath) -> Result<()> {
        let remote = self
            .client
            .head_object(src)
            .await?
            .ok_or_else(|| StorageError::NotFound(src.to_string()))?;

        let from = self.shadow.path_for(src);
        let local = match self.shadow.local_info(&from).await? {
            Some(info) => info,
            None => {
                // nothing local can be lost, so fetch a copy to move
                self.objects.delete_cache(src);
                self.materialize_locked(src).await?;
                self.shadow
                    .local_info(&from)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(from.display().to_string()))?
            }
        };

        if ShadowStore::sync_action(Some(&local), &remote) != SyncAction::Reuse {
            warn!(
                path = %src,
                local_size = local.size,
                remote_size = remote.size,
                local_modified = %local.modified,
                remote_modified = %remote.last_write_time,
                "local copy differs from remote, refusing rename"
            );
            return Err(StorageError::Inconsistent(src.to_string()));
        }

        let to = self.shadow.path_for(dst);
        self.shadow.rename(&from, &to).await?;

        if let Err(e) = self.put_object_locked(dst, &remote.times(), Some(&to)).await {
            let _ = self.shadow.rename(&to, &from).await;
            return Err(e);
        }
        self.client.delete_object(src).await
    }

    /// Evict object cache entries older than the configured age.
    pub fn on_timer(&self) -> usize {
        let threshold = Utc::now() - self.settings.object_cache_expiry;
        let removed = self.objects.delete_older_than(threshold);
        debug!(removed, "timer pass");
        removed
    }

    /// Reload a stale container list and prune expired shadow files.
    pub async fn on_idle(&self) -> Result<IdleSummary> {
        let now = Utc::now();
        let containers_reloaded = match self
            .buckets
            .reload(now - self.settings.bucket_cache_expiry)
            .await
        {
            Ok(reloaded) => reloaded,
            Err(e) => {
                warn!(error = %e, "container reload failed");
                false
            }
        };
        let pruned = self
            .shadow
            .prune(now - self.settings.shadow_file_retention)
            .await?;

        Ok(IdleSummary {
            containers_reloaded,
            pruned,
        })
    }

    /// Handle an administrative event id such as `clear-cache`.
    pub async fn on_notify(&self, event_id: &str) -> Result<NotifyOutcome> {
        let event = match event_id.parse::<NotifyEvent>() {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "ignoring notification");
                return Ok(NotifyOutcome::Ignored);
            }
        };
        info!(event = %event, "notification received");

        match event {
            NotifyEvent::ClearCache => {
                self.buckets.clear();
                let entries = self.objects.clear();
                self.on_timer();
                self.on_idle().await?;
                Ok(NotifyOutcome::Cleared { entries })
            }
            NotifyEvent::PrintReport => {
                let report = self.report();
                info!(
                    containers = report.buckets.containers,
                    heads = report.objects.heads.positive_entries,
                    negative_heads = report.objects.heads.negative_entries,
                    listings = report.objects.listings.positive_entries,
                    path_locks = report.path_locks,
                    "cache report"
                );
                Ok(NotifyOutcome::Report(report))
            }
        }
    }

    pub fn report(&self) -> CacheReport {
        CacheReport {
            generated_at: Utc::now(),
            buckets: self.buckets.stats(),
            objects: self.objects.stats(),
            path_locks: self.locks.len(),
            shadow_dir: self.shadow.root().to_path_buf(),
        }
    }
}
