//! Metadata cache and transfer core for presenting an object store as a
//! hierarchical filesystem.
//!
//! The [`facade::StorageFacade`] is the entry point. It sits on top of the
//! container and object catalogs, the directory materializer, the chunked
//! transfer coordinator and the per-path lock registry, and reaches the
//! backend only through the [`api::ApiClient`] capability.

pub mod api;
pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod facade;
pub mod materializer;
pub mod path;
pub mod path_lock;
pub mod shadow;
pub mod transfer;
pub mod worker;

pub mod prelude {
    pub use crate::api::{ApiClient, CompletedPart, ContainerInfo, ListResult, ObjectSummary};
    pub use crate::config::{Config, Settings, TransferSettings};
    pub use crate::entry::{DirectoryEntry, EntryKind, EntryRef, FileAttributes, FileTimes};
    pub use crate::error::{Result, StorageError};
    pub use crate::facade::{NotifyEvent, NotifyOutcome, ShadowFile, StorageFacade};
    pub use crate::path::ObjectPath;
    pub use crate::worker::{QueuedWorkerPool, WorkerPool};
}
