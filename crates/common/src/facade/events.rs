//! Administrative events and the diagnostic report.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{BucketCatalogStats, ObjectCatalogStats};
use crate::shadow::PruneSummary;

/// Out-of-band commands delivered through [`super::StorageFacade::on_notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    /// Drop every cached entry, then run the periodic hooks
    ClearCache,
    /// Build and log a [`CacheReport`]
    PrintReport,
}

impl NotifyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyEvent::ClearCache => "clear-cache",
            NotifyEvent::PrintReport => "print-report",
        }
    }
}

impl fmt::Display for NotifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown event {0:?}")]
pub struct UnknownEvent(pub String);

impl FromStr for NotifyEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "clear-cache" => Ok(NotifyEvent::ClearCache),
            "print-report" => Ok(NotifyEvent::PrintReport),
            other => Err(UnknownEvent(other.to_string())),
        }
    }
}

/// What a notification did.
#[derive(Debug, Clone)]
pub enum NotifyOutcome {
    Cleared { entries: usize },
    Report(CacheReport),
    Ignored,
}

/// Result of one idle pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IdleSummary {
    pub containers_reloaded: bool,
    pub pruned: PruneSummary,
}

/// Snapshot of every cache owned by the facade.
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub generated_at: DateTime<Utc>,
    pub buckets: BucketCatalogStats,
    pub objects: ObjectCatalogStats,
    pub path_locks: usize,
    pub shadow_dir: PathBuf,
}
