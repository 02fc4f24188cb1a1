use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path as StorePath;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, MultipartUpload, ObjectMeta, ObjectStore,
    PutMultipartOpts, PutOptions, PutPayload,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, trace, warn};

use common::api::{
    ApiClient, CompletedPart, ContainerInfo, ListResult, ObjectSummary, Region, SessionId,
};
use common::entry::{DirectoryEntry, FileTimes, PROP_ETAG, PROP_LAST_MODIFIED};
use common::error::{Result, StorageError};
use common::path::{ObjectPath, SEPARATOR};

/// Leaf name holding a directory marker.
///
/// Store paths cannot end with a delimiter, so the marker for `a/b/` lives
/// at `a/b/.objmount-dir` and is reported back as the key `a/b/`.
pub const DIRECTORY_MARKER: &str = ".objmount-dir";

/// A multi-part upload whose parts are spooled to disk as they arrive.
///
/// Parts may arrive in any order while the store wants them in sequence,
/// so they are streamed to the store's multipart API on completion. The
/// spool directory goes away with the session.
#[derive(Debug)]
struct PendingUpload {
    location: StorePath,
    attributes: Attributes,
    spool: tempfile::TempDir,
    parts: BTreeMap<usize, SpooledPart>,
}

#[derive(Debug, Clone)]
struct SpooledPart {
    etag: String,
    file: PathBuf,
    size: u64,
}

/// One container served from an [`ObjectStore`].
#[derive(Debug)]
pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
    container: String,
    region: Region,
    created: DateTime<Utc>,
    sessions: Mutex<HashMap<SessionId, PendingUpload>>,
}

impl ObjectStoreClient {
    pub fn new(store: Arc<dyn ObjectStore>, container: String, region: Region) -> Self {
        Self {
            store,
            container,
            region,
            created: Utc::now(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn check_container(&self, container: &str) -> Result<()> {
        if container == self.container {
            Ok(())
        } else {
            Err(StorageError::NotFound(container.to_string()))
        }
    }

    /// Store location of an object or of a directory's marker.
    fn location(&self, path: &ObjectPath) -> Result<StorePath> {
        self.check_container(path.container())?;
        let key = if path.is_dir() {
            format!("{}{}", path.key(), DIRECTORY_MARKER)
        } else {
            path.key().to_string()
        };
        StorePath::parse(&key).map_err(|e| StorageError::InvalidPath(e.to_string()))
    }

    fn prefix(&self, path: &ObjectPath) -> Result<Option<StorePath>> {
        self.check_container(path.container())?;
        let key = path.key().trim_end_matches(SEPARATOR);
        if key.is_empty() {
            return Ok(None);
        }
        StorePath::parse(key)
            .map(Some)
            .map_err(|e| StorageError::InvalidPath(e.to_string()))
    }

    fn summary(meta: &ObjectMeta) -> Option<ObjectSummary> {
        let location: &str = meta.location.as_ref();
        let key = match location.strip_suffix(DIRECTORY_MARKER) {
            Some("") => return None,
            Some(dir) if dir.ends_with(SEPARATOR) => dir.to_string(),
            _ => location.to_string(),
        };
        Some(ObjectSummary {
            key,
            size: meta.size as u64,
            last_modified: meta.last_modified,
            etag: meta.e_tag.clone(),
        })
    }
}

fn map_err(path: impl std::fmt::Display, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(path.to_string()),
        other => StorageError::backend(other),
    }
}

fn to_attributes(times: &FileTimes) -> Attributes {
    let mut attributes = Attributes::new();
    for (key, value) in times.to_user_metadata() {
        attributes.insert(Attribute::Metadata(Cow::Owned(key)), AttributeValue::from(value));
    }
    attributes
}

fn user_metadata(attributes: &Attributes) -> BTreeMap<String, String> {
    attributes
        .iter()
        .filter_map(|(attribute, value)| match attribute {
            Attribute::Metadata(key) => {
                let value: &str = value.as_ref();
                Some((key.to_string(), value.to_string()))
            }
            _ => None,
        })
        .collect()
}

async fn read_slice(source: &Path, offset: u64, length: u64) -> Result<Bytes> {
    let mut file = tokio::fs::File::open(source).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[async_trait]
impl ApiClient for ObjectStoreClient {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        Ok(vec![ContainerInfo {
            name: self.container.clone(),
            creation_time: self.created,
        }])
    }

    async fn get_container_region(&self, name: &str) -> Result<Region> {
        self.check_container(name)?;
        Ok(self.region.clone())
    }

    fn can_access_region(&self, region: &str) -> bool {
        region == self.region
    }

    async fn head_object(&self, path: &ObjectPath) -> Result<Option<DirectoryEntry>> {
        let location = self.location(path)?;
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = match self.store.get_opts(&location, options).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                trace!(path = %path, "head: no such object");
                return Ok(None);
            }
            Err(e) => return Err(map_err(path, e)),
        };

        let meta = &result.meta;
        let times = FileTimes::from_user_metadata(&user_metadata(&result.attributes), meta.last_modified);
        let mut entry = DirectoryEntry::file(path.name(), meta.size as u64, times);
        entry.extra.insert(
            PROP_LAST_MODIFIED.to_string(),
            meta.last_modified.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        if let Some(etag) = &meta.e_tag {
            entry.extra.insert(PROP_ETAG.to_string(), etag.clone());
        }
        Ok(Some(entry))
    }

    async fn list_objects(
        &self,
        path: &ObjectPath,
        delimiter: Option<char>,
        limit: Option<usize>,
    ) -> Result<ListResult> {
        let prefix = self.prefix(path)?;
        let mut result = match delimiter {
            Some(SEPARATOR) => {
                let listing = self
                    .store
                    .list_with_delimiter(prefix.as_ref())
                    .await
                    .map_err(|e| map_err(path, e))?;
                ListResult {
                    prefixes: listing
                        .common_prefixes
                        .iter()
                        .map(|p| format!("{}{}", p, SEPARATOR))
                        .collect(),
                    objects: listing.objects.iter().filter_map(Self::summary).collect(),
                }
            }
            Some(other) => {
                return Err(StorageError::InvalidPath(format!(
                    "unsupported delimiter {other:?}"
                )))
            }
            None => {
                let objects: Vec<ObjectMeta> = self
                    .store
                    .list(prefix.as_ref())
                    .try_collect()
                    .await
                    .map_err(|e| map_err(path, e))?;
                ListResult {
                    prefixes: Vec::new(),
                    objects: objects.iter().filter_map(Self::summary).collect(),
                }
            }
        };

        if let Some(limit) = limit {
            result.prefixes.truncate(limit);
            result.objects.truncate(limit - result.prefixes.len());
        }
        debug!(
            path = %path,
            prefixes = result.prefixes.len(),
            objects = result.objects.len(),
            "listed objects"
        );
        Ok(result)
    }

    async fn get_object_range(
        &self,
        path: &ObjectPath,
        offset: u64,
        length: u64,
        output: &Path,
    ) -> Result<u64> {
        if length == 0 {
            return Ok(0);
        }
        let location = self.location(path)?;
        let range = offset as usize..(offset + length) as usize;
        let bytes = self
            .store
            .get_range(&location, range)
            .await
            .map_err(|e| map_err(path, e))?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(output)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        trace!(path = %path, offset, length = bytes.len(), "read range");
        Ok(bytes.len() as u64)
    }

    async fn put_object(
        &self,
        path: &ObjectPath,
        times: &FileTimes,
        source: Option<&Path>,
    ) -> Result<()> {
        let location = self.location(path)?;
        let payload = match source {
            Some(source) => PutPayload::from(tokio::fs::read(source).await?),
            None => PutPayload::new(),
        };
        let options = PutOptions {
            attributes: to_attributes(times),
            ..Default::default()
        };
        self.store
            .put_opts(&location, payload, options)
            .await
            .map_err(|e| map_err(path, e))?;
        debug!(path = %path, "put object");
        Ok(())
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<()> {
        let location = self.location(path)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_err(path, e)),
        }
    }

    async fn delete_objects(&self, container: &str, keys: &[String]) -> Result<()> {
        let locations = keys
            .iter()
            .map(|key| ObjectPath::new(container, key).and_then(|p| self.location(&p)))
            .collect::<Result<Vec<_>>>()?;

        let deleted: Vec<StorePath> = self
            .store
            .delete_stream(futures::stream::iter(locations.into_iter().map(Ok)).boxed())
            .try_collect()
            .await
            .map_err(|e| map_err(container, e))?;
        debug!(container, count = deleted.len(), "deleted objects");
        Ok(())
    }

    async fn create_session(&self, path: &ObjectPath, times: &FileTimes) -> Result<SessionId> {
        let location = self.location(path)?;
        let spool = tempfile::Builder::new().prefix("objmount-upload-").tempdir()?;
        let id = uuid::Uuid::new_v4().to_string();
        debug!(path = %path, session = %id, spool = %spool.path().display(), "created upload session");
        self.sessions.lock().insert(
            id.clone(),
            PendingUpload {
                location,
                attributes: to_attributes(times),
                spool,
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        path: &ObjectPath,
        session: &SessionId,
        part_number: usize,
        source: &Path,
        offset: u64,
        length: u64,
    ) -> Result<String> {
        let missing = || StorageError::NotFound(format!("{path}: session {session}"));
        let file = self
            .sessions
            .lock()
            .get(session)
            .map(|upload| upload.spool.path().join(format!("part-{part_number:05}")))
            .ok_or_else(missing)?;

        let bytes = read_slice(source, offset, length).await?;
        let etag = hex::encode(Sha256::digest(&bytes));
        tokio::fs::write(&file, &bytes).await?;

        let mut sessions = self.sessions.lock();
        let upload = sessions.get_mut(session).ok_or_else(missing)?;
        upload.parts.insert(
            part_number,
            SpooledPart {
                etag: etag.clone(),
                file,
                size: length,
            },
        );
        trace!(path = %path, session = %session, part = part_number, "spooled part");
        Ok(etag)
    }

    async fn complete_session(
        &self,
        path: &ObjectPath,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let upload = self
            .sessions
            .lock()
            .remove(session)
            .ok_or_else(|| StorageError::NotFound(format!("{path}: session {session}")))?;

        let mut spooled = Vec::with_capacity(parts.len());
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some(found) if found.etag == part.etag => spooled.push(found.clone()),
                _ => {
                    warn!(path = %path, part = part.part_number, "part missing or etag mismatch");
                    return Err(StorageError::Inconsistent(format!(
                        "{path}: part {} does not match the session",
                        part.part_number
                    )));
                }
            }
        }

        let options = PutMultipartOpts {
            attributes: upload.attributes,
            ..Default::default()
        };
        let mut writer = self
            .store
            .put_multipart_opts(&upload.location, options)
            .await
            .map_err(|e| map_err(path, e))?;

        let mut size = 0;
        for part in &spooled {
            let sent = match tokio::fs::read(&part.file).await {
                Ok(data) => writer
                    .put_part(PutPayload::from(data))
                    .await
                    .map_err(|e| map_err(path, e)),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = sent {
                if let Err(abort) = writer.abort().await {
                    warn!(path = %path, error = %abort, "failed to abort store upload");
                }
                return Err(e);
            }
            size += part.size;
        }
        writer.complete().await.map_err(|e| map_err(path, e))?;
        info!(path = %path, parts = parts.len(), size, "completed upload session");
        Ok(())
    }

    async fn abort_session(&self, path: &ObjectPath, session: &SessionId) -> Result<()> {
        if self.sessions.lock().remove(session).is_some() {
            debug!(path = %path, session = %session, "aborted upload session");
        }
        Ok(())
    }
}
