//! Directory entries handed to the filesystem-call layer.
//!
//! Entries are shared as [`EntryRef`] (`Arc<DirectoryEntry>`) and never
//! mutated in place once published. Attribute patching goes through
//! [`Arc::make_mut`], which copies when the entry is shared.

use std::collections::BTreeMap;
use std::ops::BitOr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// User metadata key holding the creation time.
pub const META_CREATION_TIME: &str = "objmount-creation-time";
/// User metadata key holding the last access time.
pub const META_LAST_ACCESS_TIME: &str = "objmount-last-access-time";
/// User metadata key holding the last write time.
pub const META_LAST_WRITE_TIME: &str = "objmount-last-write-time";
/// User metadata key holding the change time.
pub const META_CHANGE_TIME: &str = "objmount-change-time";

/// Extra property carrying the backend ETag.
pub const PROP_ETAG: &str = "objmount-etag";
/// Extra property carrying the backend last-modified time.
pub const PROP_LAST_MODIFIED: &str = "objmount-last-modified";

/// Shared, immutable directory entry.
pub type EntryRef = Arc<DirectoryEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Root,
    Container,
    Directory,
    File,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        !matches!(self, EntryKind::File)
    }
}

/// Attribute bitset, using the conventional Windows bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileAttributes(u32);

impl FileAttributes {
    pub const READONLY: Self = Self(0x01);
    pub const HIDDEN: Self = Self(0x02);
    pub const DIRECTORY: Self = Self(0x10);
    pub const NORMAL: Self = Self(0x80);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for FileAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The four timestamps tracked per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTimes {
    pub creation: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub last_write: DateTime<Utc>,
    pub change: DateTime<Utc>,
}

impl FileTimes {
    /// All four timestamps set to `time`.
    pub fn uniform(time: DateTime<Utc>) -> Self {
        Self {
            creation: time,
            last_access: time,
            last_write: time,
            change: time,
        }
    }

    /// Encode as object-store user metadata.
    pub fn to_user_metadata(&self) -> BTreeMap<String, String> {
        let fmt = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Nanos, true);
        BTreeMap::from([
            (META_CREATION_TIME.to_string(), fmt(&self.creation)),
            (META_LAST_ACCESS_TIME.to_string(), fmt(&self.last_access)),
            (META_LAST_WRITE_TIME.to_string(), fmt(&self.last_write)),
            (META_CHANGE_TIME.to_string(), fmt(&self.change)),
        ])
    }

    /// Decode from object-store user metadata.
    ///
    /// Missing or unparsable keys take `fallback`, normally the backend's
    /// last-modified time.
    pub fn from_user_metadata(meta: &BTreeMap<String, String>, fallback: DateTime<Utc>) -> Self {
        let read = |key: &str| {
            meta.get(key)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(fallback)
        };
        Self {
            creation: read(META_CREATION_TIME),
            last_access: read(META_LAST_ACCESS_TIME),
            last_write: read(META_LAST_WRITE_TIME),
            change: read(META_CHANGE_TIME),
        }
    }
}

/// A single file, directory, container or root entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub creation_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    pub last_write_time: DateTime<Utc>,
    pub change_time: DateTime<Utc>,
    pub attributes: FileAttributes,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl DirectoryEntry {
    /// Create an entry, deriving the attribute bits from kind and name.
    pub fn new(name: impl Into<String>, kind: EntryKind, size: u64, times: FileTimes) -> Self {
        let mut entry = Self {
            name: name.into(),
            kind,
            size,
            creation_time: times.creation,
            last_access_time: times.last_access,
            last_write_time: times.last_write,
            change_time: times.change,
            attributes: FileAttributes::empty(),
            extra: BTreeMap::new(),
        };
        entry.derive_attributes();
        entry
    }

    pub fn root(time: DateTime<Utc>) -> Self {
        Self::new("/", EntryKind::Root, 0, FileTimes::uniform(time))
    }

    pub fn container(name: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self::new(name, EntryKind::Container, 0, FileTimes::uniform(time))
    }

    pub fn directory(name: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self::new(name, EntryKind::Directory, 0, FileTimes::uniform(time))
    }

    pub fn file(name: impl Into<String>, size: u64, times: FileTimes) -> Self {
        Self::new(name, EntryKind::File, size, times)
    }

    fn derive_attributes(&mut self) {
        if self.kind.is_dir() {
            self.attributes.insert(FileAttributes::DIRECTORY);
        }
        if self.name.starts_with('.') && self.name != "." && self.name != ".." {
            self.attributes.insert(FileAttributes::HIDDEN);
        }
        if self.kind == EntryKind::File && self.attributes.is_empty() {
            self.attributes.insert(FileAttributes::NORMAL);
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_hidden(&self) -> bool {
        self.attributes.contains(FileAttributes::HIDDEN)
    }

    /// Set the hidden bit. `NORMAL` is only valid alone, so it is dropped.
    pub fn set_hidden(&mut self) {
        self.attributes.remove(FileAttributes::NORMAL);
        self.attributes.insert(FileAttributes::HIDDEN);
    }

    pub fn times(&self) -> FileTimes {
        FileTimes {
            creation: self.creation_time,
            last_access: self.last_access_time,
            last_write: self.last_write_time,
            change: self.change_time,
        }
    }

    pub fn set_times(&mut self, times: FileTimes) {
        self.creation_time = times.creation;
        self.last_access_time = times.last_access;
        self.last_write_time = times.last_write;
        self.change_time = times.change;
    }

    /// A copy of this entry presented under another name, used for `.` and `..`.
    pub fn renamed(&self, name: &str) -> Self {
        let mut out = Self::new(name, EntryKind::Directory, 0, self.times());
        out.extra = self.extra.clone();
        out
    }

    pub fn etag(&self) -> Option<&str> {
        self.extra.get(PROP_ETAG).map(String::as_str)
    }
}
