//! The object-store capability consumed by the core.
//!
//! Implementations own wire protocol, credentials, retries and backoff. The
//! core never retries a failed call.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entry::{DirectoryEntry, FileTimes};
use crate::error::Result;
use crate::path::ObjectPath;

/// Region identifier as reported by the backend.
pub type Region = String;

/// Identifier of an open multi-part upload.
pub type SessionId = String;

/// A container as returned by the backend listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub creation_time: DateTime<Utc>,
}

/// A content entry from a delimited listing. `key` is the full object key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
}

/// Result of a delimited listing.
///
/// `prefixes` holds full keys of the common prefixes, each ending with the
/// delimiter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    pub prefixes: Vec<String>,
    pub objects: Vec<ObjectSummary>,
}

/// ETag returned for one uploaded part, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: usize,
    pub etag: String,
}

/// Primitive object-store operations.
#[async_trait]
pub trait ApiClient: Send + Sync + Debug + 'static {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>>;

    async fn get_container_region(&self, name: &str) -> Result<Region>;

    /// Whether this client may talk to a container in `region`.
    fn can_access_region(&self, region: &str) -> bool;

    /// Metadata for one object, `Ok(None)` when it does not exist.
    ///
    /// Times are decoded from user metadata when present
    /// (see [`FileTimes::from_user_metadata`]).
    async fn head_object(&self, path: &ObjectPath) -> Result<Option<DirectoryEntry>>;

    /// List the objects under a directory-shaped `path`.
    async fn list_objects(
        &self,
        path: &ObjectPath,
        delimiter: Option<char>,
        limit: Option<usize>,
    ) -> Result<ListResult>;

    /// Read `length` bytes at `offset` and write them at the same offset of
    /// `output`. Returns the number of bytes written.
    async fn get_object_range(
        &self,
        path: &ObjectPath,
        offset: u64,
        length: u64,
        output: &Path,
    ) -> Result<u64>;

    /// Upload `source` (or an empty body) with `times` stored as user metadata.
    async fn put_object(
        &self,
        path: &ObjectPath,
        times: &FileTimes,
        source: Option<&Path>,
    ) -> Result<()>;

    async fn delete_object(&self, path: &ObjectPath) -> Result<()>;

    async fn delete_objects(&self, container: &str, keys: &[String]) -> Result<()>;

    async fn create_session(&self, path: &ObjectPath, times: &FileTimes) -> Result<SessionId>;

    /// Upload bytes `offset..offset + length` of `source` as part `part_number`.
    /// Returns the part ETag.
    async fn upload_part(
        &self,
        path: &ObjectPath,
        session: &SessionId,
        part_number: usize,
        source: &Path,
        offset: u64,
        length: u64,
    ) -> Result<String>;

    /// `parts` are ordered by ascending part number.
    async fn complete_session(
        &self,
        path: &ObjectPath,
        session: &SessionId,
        parts: &[CompletedPart],
    ) -> Result<()>;

    async fn abort_session(&self, path: &ObjectPath, session: &SessionId) -> Result<()>;
}
