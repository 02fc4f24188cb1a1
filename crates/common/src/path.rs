//! Normalized container + key addressing.
//!
//! An [`ObjectPath`] is the cache key used everywhere in the core. Keys that
//! end in `/` are directory-shaped; an empty key denotes the container itself.

use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// Key separator used by the object store.
pub const SEPARATOR: char = '/';

/// A normalized (container, key) pair.
///
/// Both fields are normalized on construction, so the derived equality and
/// hashing agree with comparison of the string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath {
    container: String,
    key: String,
}

impl ObjectPath {
    /// Build a path from a container name and a key relative to it.
    pub fn new(container: &str, key: &str) -> Result<Self, StorageError> {
        let container = container.trim();
        if container.is_empty() || container.contains(SEPARATOR) {
            return Err(StorageError::InvalidPath(format!(
                "bad container name {:?}",
                container
            )));
        }

        let segments = Self::segments(key)?;
        let mut normalized = segments.join("/");
        if !normalized.is_empty() && key.trim_end().ends_with(['/', '\\']) {
            normalized.push(SEPARATOR);
        }

        Ok(Self {
            container: container.to_string(),
            key: normalized,
        })
    }

    /// The container path for `name`.
    pub fn container_root(name: &str) -> Result<Self, StorageError> {
        Self::new(name, "")
    }

    /// Parse a slash separated path such as `/bucket/dir/file` or `bucket/dir/`.
    ///
    /// Leading separators are ignored, backslashes are accepted as separators
    /// and a trailing separator is preserved.
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        let trimmed = path.trim();
        let segments = Self::segments(trimmed)?;
        let Some((container, rest)) = segments.split_first() else {
            return Err(StorageError::InvalidPath(path.to_string()));
        };

        let mut key = rest.join("/");
        if !key.is_empty() && trimmed.ends_with(['/', '\\']) {
            key.push(SEPARATOR);
        }

        Ok(Self {
            container: container.to_string(),
            key,
        })
    }

    fn segments(path: &str) -> Result<Vec<&str>, StorageError> {
        let segments: Vec<&str> = path
            .split(['/', '\\'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(segments)
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Key relative to the container, empty for the container itself.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True when this path denotes the container itself.
    pub fn is_container(&self) -> bool {
        self.key.is_empty()
    }

    /// True for directory-shaped paths, including the container.
    pub fn is_dir(&self) -> bool {
        self.key.is_empty() || self.key.ends_with(SEPARATOR)
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Last path component without a trailing separator.
    pub fn name(&self) -> &str {
        if self.key.is_empty() {
            return &self.container;
        }
        let trimmed = self.key.trim_end_matches(SEPARATOR);
        match trimmed.rfind(SEPARATOR) {
            Some(pos) => &trimmed[pos + 1..],
            None => trimmed,
        }
    }

    /// Names beginning with a dot are hidden.
    pub fn is_hidden(&self) -> bool {
        !self.is_container() && self.name().starts_with('.')
    }

    /// The directory containing this path. The container has no parent.
    pub fn parent(&self) -> Option<ObjectPath> {
        if self.key.is_empty() {
            return None;
        }
        let trimmed = self.key.trim_end_matches(SEPARATOR);
        let key = match trimmed.rfind(SEPARATOR) {
            Some(pos) => trimmed[..=pos].to_string(),
            None => String::new(),
        };
        Some(Self {
            container: self.container.clone(),
            key,
        })
    }

    /// A child of this directory. `name` must be a single component.
    pub fn join(&self, name: &str, is_dir: bool) -> Result<ObjectPath, StorageError> {
        let name = name.trim_matches(SEPARATOR);
        if name.is_empty() || name.contains(SEPARATOR) || name == "." || name == ".." {
            return Err(StorageError::InvalidPath(format!("{}{}", self, name)));
        }

        let mut key = self.to_dir().key;
        key.push_str(name);
        if is_dir {
            key.push(SEPARATOR);
        }
        Ok(Self {
            container: self.container.clone(),
            key,
        })
    }

    /// The directory-shaped form of this path.
    pub fn to_dir(&self) -> ObjectPath {
        let mut out = self.clone();
        if !out.is_dir() {
            out.key.push(SEPARATOR);
        }
        out
    }

    /// The file-shaped form of this path. The container is returned unchanged.
    pub fn to_file(&self) -> ObjectPath {
        let mut out = self.clone();
        while out.key.ends_with(SEPARATOR) {
            out.key.pop();
        }
        out
    }

    /// Absolute slash form, as seen by the filesystem-call layer.
    pub fn fs_path(&self) -> String {
        format!("/{}/{}", self.container, self.key)
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

impl FromStr for ObjectPath {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
