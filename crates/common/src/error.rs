//! Error taxonomy shared by the catalogs, the transfer coordinator and the facade.
//!
//! Catalogs report "not found" as an explicit negative result (`Ok(None)`),
//! so [`StorageError::NotFound`] is only produced at the facade boundary.

use std::io;

/// Errors surfaced by storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Object or container does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, authorization or region failure reported by the backend
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// One or more parts of a chunked transfer failed
    #[error("transfer failed: {failed} of {total} parts did not complete")]
    PartialTransfer { failed: usize, total: usize },

    /// Local and remote state disagree; the operation was refused
    #[error("local and remote state disagree: {0}")]
    Inconsistent(String),

    /// Directory still has children
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Path could not be parsed into a container and key
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Convenience constructor for backend failures.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable(err.to_string())
    }

    /// POSIX error code handed to the filesystem-call layer.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::BackendUnavailable(_) | Self::PartialTransfer { .. } => libc::EIO,
            Self::Inconsistent(_) => libc::EBUSY,
            Self::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            Self::InvalidPath(_) | Self::Config(_) => libc::EINVAL,
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// True for errors that mean the target is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
