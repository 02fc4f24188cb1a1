//! Shared fixtures for the integration tests: an in-memory [`ApiClient`]
//! that counts every call and can be told to fail or stall.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use ::common::api::{
    ApiClient, CompletedPart, ContainerInfo, ListResult, ObjectSummary, Region, SessionId,
};
use ::common::config::{Settings, TransferSettings};
use ::common::entry::{DirectoryEntry, FileTimes, PROP_ETAG};
use ::common::error::{Result, StorageError};
use ::common::facade::StorageFacade;
use ::common::path::ObjectPath;
use ::common::worker::QueuedWorkerPool;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
}

#[derive(Debug, Default)]
struct Session {
    key: (String, String),
    metadata: BTreeMap<String, String>,
    parts: BTreeMap<usize, Vec<u8>>,
}

/// Operations the mock can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListContainers,
    GetRegion,
    HeadObject,
    ListObjects,
    GetRange,
    PutObject,
    DeleteObject,
    CreateSession,
    UploadPart,
    CompleteSession,
    AbortSession,
}

/// A time window during which a range read was in flight.
#[derive(Debug, Clone)]
pub struct ReadWindow {
    pub key: String,
    pub start: Instant,
    pub end: Instant,
}

#[derive(Debug, Default)]
pub struct MockApiClient {
    containers: Mutex<Vec<(ContainerInfo, Region)>>,
    denied_regions: Mutex<HashSet<String>>,
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    sessions: Mutex<HashMap<SessionId, Session>>,
    calls: Mutex<HashMap<Op, usize>>,
    failing: Mutex<HashSet<Op>>,
    failing_parts: Mutex<HashSet<usize>>,
    part_delays: Mutex<HashMap<usize, Duration>>,
    read_delay: Mutex<Option<Duration>>,
    read_windows: Mutex<Vec<ReadWindow>>,
    completed: Mutex<Vec<Vec<CompletedPart>>>,
    next_id: AtomicUsize,
}

impl MockApiClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_container(&self, name: &str, region: &str) {
        self.containers.lock().push((
            ContainerInfo {
                name: name.to_string(),
                creation_time: Utc::now(),
            },
            region.to_string(),
        ));
    }

    pub fn deny_region(&self, region: &str) {
        self.denied_regions.lock().insert(region.to_string());
    }

    /// Store an object at `path` (`container/key`) with no time metadata.
    pub fn insert(&self, path: &str, data: &[u8]) {
        self.insert_at(path, data, Utc::now());
    }

    pub fn insert_at(&self, path: &str, data: &[u8], last_modified: DateTime<Utc>) {
        let (container, key) = path.split_once('/').expect("path has a container");
        let etag = self.etag();
        self.objects.lock().insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                data: data.to_vec(),
                metadata: BTreeMap::new(),
                last_modified,
                etag,
            },
        );
    }

    /// Remove an object behind the caches' back.
    pub fn remove(&self, path: &str) {
        if let Some((container, key)) = path.split_once('/') {
            self.objects
                .lock()
                .remove(&(container.to_string(), key.to_string()));
        }
    }

    pub fn object(&self, path: &str) -> Option<StoredObject> {
        let (container, key) = path.split_once('/')?;
        self.objects
            .lock()
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn fail(&self, op: Op) {
        self.failing.lock().insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.failing.lock().remove(&op);
    }

    /// Make the given 1-based part fail on upload and download.
    pub fn fail_part(&self, index: usize) {
        self.failing_parts.lock().insert(index);
    }

    pub fn delay_part(&self, index: usize, delay: Duration) {
        self.part_delays.lock().insert(index, delay);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }

    pub fn read_windows(&self) -> Vec<ReadWindow> {
        self.read_windows.lock().clone()
    }

    /// Part lists received by every completed session, in call order.
    pub fn completed_sessions(&self) -> Vec<Vec<CompletedPart>> {
        self.completed.lock().clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn record(&self, op: Op) -> Result<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        if self.failing.lock().contains(&op) {
            return Err(StorageError::backend(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    fn etag(&self) -> String {
        format!("\"etag-{}\"", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn part_gate(&self, index: usize) -> Result<()> {
        let delay = self.part_delays.lock().get(&index).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_parts.lock().contains(&index) {
            return Err(StorageError::backend(format!("injected failure on part {index}")));
        }
        Ok(())
    }

    fn key_of(path: &ObjectPath) -> (String, String) {
        (path.container().to_string(), path.key().to_string())
    }
}

/// Part number of a ranged read, exact for every part but a short final one.
fn part_index(offset: u64, length: u64) -> usize {
    if length == 0 {
        1
    } else {
        (offset / length) as usize + 1
    }
}

#[async_trait]
impl ApiClient for MockApiClient {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>> {
        self.record(Op::ListContainers)?;
        Ok(self.containers.lock().iter().map(|(c, _)| c.clone()).collect())
    }

    async fn get_container_region(&self, name: &str) -> Result<Region> {
        self.record(Op::GetRegion)?;
        self.containers
            .lock()
            .iter()
            .find(|(c, _)| c.name == name)
            .map(|(_, region)| region.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn can_access_region(&self, region: &str) -> bool {
        !self.denied_regions.lock().contains(region)
    }

    async fn head_object(&self, path: &ObjectPath) -> Result<Option<DirectoryEntry>> {
        self.record(Op::HeadObject)?;
        let objects = self.objects.lock();
        let Some(object) = objects.get(&Self::key_of(path)) else {
            return Ok(None);
        };
        let times = FileTimes::from_user_metadata(&object.metadata, object.last_modified);
        let mut entry = DirectoryEntry::file(path.name(), object.data.len() as u64, times);
        entry
            .extra
            .insert(PROP_ETAG.to_string(), object.etag.clone());
        Ok(Some(entry))
    }

    async fn list_objects(
        &self,
        path: &ObjectPath,
        delimiter: Option<char>,
        limit: Option<usize>,
    ) -> Result<ListResult> {
        self.record(Op::ListObjects)?;
        let prefix = path.key();
        let mut prefixes = BTreeSet::new();
        let mut summaries = Vec::new();

        for ((container, key), object) in self.objects.lock().iter() {
            if container != path.container() {
                continue;
            }
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            if let Some(d) = delimiter {
                if let Some(i) = rest.find(d) {
                    prefixes.insert(format!("{}{}", prefix, &rest[..i + d.len_utf8()]));
                    continue;
                }
            }
            summaries.push(ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
                etag: Some(object.etag.clone()),
            });
        }

        let mut result = ListResult {
            prefixes: prefixes.into_iter().collect(),
            objects: summaries,
        };
        if let Some(limit) = limit {
            result.prefixes.truncate(limit);
            let remaining = limit - result.prefixes.len();
            result.objects.truncate(remaining);
        }
        Ok(result)
    }

    async fn get_object_range(
        &self,
        path: &ObjectPath,
        offset: u64,
        length: u64,
        output: &Path,
    ) -> Result<u64> {
        self.record(Op::GetRange)?;
        let start = Instant::now();
        self.part_gate(part_index(offset, length)).await?;
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let bytes = {
            let objects = self.objects.lock();
            let object = objects
                .get(&Self::key_of(path))
                .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
            let begin = (offset as usize).min(object.data.len());
            let end = (begin + length as usize).min(object.data.len());
            object.data[begin..end].to_vec()
        };

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(output)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        self.read_windows.lock().push(ReadWindow {
            key: path.to_string(),
            start,
            end: Instant::now(),
        });
        Ok(bytes.len() as u64)
    }

    async fn put_object(
        &self,
        path: &ObjectPath,
        times: &FileTimes,
        source: Option<&Path>,
    ) -> Result<()> {
        self.record(Op::PutObject)?;
        let data = match source {
            Some(source) => tokio::fs::read(source).await?,
            None => Vec::new(),
        };
        let etag = self.etag();
        self.objects.lock().insert(
            Self::key_of(path),
            StoredObject {
                data,
                metadata: times.to_user_metadata(),
                last_modified: Utc::now(),
                etag,
            },
        );
        Ok(())
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<()> {
        self.record(Op::DeleteObject)?;
        self.objects.lock().remove(&Self::key_of(path));
        Ok(())
    }

    async fn delete_objects(&self, container: &str, keys: &[String]) -> Result<()> {
        self.record(Op::DeleteObject)?;
        let mut objects = self.objects.lock();
        for key in keys {
            objects.remove(&(container.to_string(), key.clone()));
        }
        Ok(())
    }

    async fn create_session(&self, path: &ObjectPath, times: &FileTimes) -> Result<SessionId> {
        self.record(Op::CreateSession)?;
        let id = format!("session-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().insert(
            id.clone(),
            Session {
                key: Self::key_of(path),
                metadata: times.to_user_metadata(),
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        _path: &ObjectPath,
        session: &SessionId,
        part_number: usize,
        source: &Path,
        offset: u64,
        length: u64,
    ) -> Result<String> {
        self.record(Op::UploadPart)?;
        self.part_gate(part_number).await?;

        let mut file = tokio::fs::File::open(source).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;

        let mut sessions = self.sessions.lock();
        let entry = sessions
            .get_mut(session)
            .ok_or_else(|| StorageError::NotFound(session.clone()))?;
        entry.parts.insert(part_number, buf);
        Ok(format!("part-{part_number}"))
    }

    async fn complete_session(
        &self,
        _path: &ObjectPath,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> Result<()> {
        self.record(Op::CompleteSession)?;
        let session = self
            .sessions
            .lock()
            .remove(session)
            .ok_or_else(|| StorageError::NotFound(session.clone()))?;

        let mut data = Vec::new();
        for part in parts {
            let bytes = session
                .parts
                .get(&part.part_number)
                .ok_or_else(|| StorageError::Inconsistent(format!("missing part {}", part.part_number)))?;
            data.extend_from_slice(bytes);
        }
        self.completed.lock().push(parts.to_vec());

        let etag = self.etag();
        self.objects.lock().insert(
            session.key,
            StoredObject {
                data,
                metadata: session.metadata,
                last_modified: Utc::now(),
                etag,
            },
        );
        Ok(())
    }

    async fn abort_session(&self, _path: &ObjectPath, session: &SessionId) -> Result<()> {
        self.record(Op::AbortSession)?;
        self.sessions.lock().remove(session);
        Ok(())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Settings with tiny parts so multi-part paths run on small payloads.
pub fn test_settings(shadow_dir: &Path) -> Settings {
    Settings {
        transfer: TransferSettings {
            part_size: 4,
            single_shot_threshold: 8,
            worker_count: 1,
        },
        shadow_dir: shadow_dir.to_path_buf(),
        ..Settings::default()
    }
}

/// Facade over a fresh mock with one container `b`.
pub async fn setup_test_env() -> (StorageFacade, Arc<MockApiClient>, TempDir) {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let settings = test_settings(&temp.path().join("shadow"));
    let (facade, client) = setup_with_settings(settings);
    (facade, client, temp)
}

pub fn setup_with_settings(settings: Settings) -> (StorageFacade, Arc<MockApiClient>) {
    let client = MockApiClient::new();
    client.add_container("b", DEFAULT_REGION);
    let pool = QueuedWorkerPool::spawn(settings.transfer.worker_count).unwrap();
    let facade = StorageFacade::new(client.clone(), Arc::new(pool), settings);
    (facade, client)
}

pub fn path(s: &str) -> ObjectPath {
    ObjectPath::parse(s).unwrap()
}

/// Write `data` to a fresh file under `dir`.
pub async fn write_source(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
    let source = dir.path().join(name);
    tokio::fs::write(&source, data).await.unwrap();
    source
}

/// Backdate both access and write times of a local file.
pub fn age_file(local: &Path, at: DateTime<Utc>) {
    let at = std::time::SystemTime::from(at);
    std::fs::OpenOptions::new()
        .write(true)
        .open(local)
        .unwrap()
        .set_times(
            std::fs::FileTimes::new()
                .set_accessed(at)
                .set_modified(at),
        )
        .unwrap();
}
