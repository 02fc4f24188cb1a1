//! Cached container list and container regions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, Region};
use crate::config::Settings;
use crate::entry::{DirectoryEntry, EntryRef};
use crate::error::Result;

#[derive(Debug, Default)]
struct ListState {
    entries: Vec<EntryRef>,
    last_set: Option<DateTime<Utc>>,
    last_get: Option<DateTime<Utc>>,
    last_clear: Option<DateTime<Utc>>,
    count_set: u64,
    count_get: u64,
    count_clear: u64,
}

/// Snapshot of the catalog for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BucketCatalogStats {
    pub containers: usize,
    pub regions: usize,
    pub last_set: Option<DateTime<Utc>>,
    pub last_get: Option<DateTime<Utc>>,
    pub last_clear: Option<DateTime<Utc>>,
    pub count_set: u64,
    pub count_get: u64,
    pub count_clear: u64,
}

/// Container list cache with a per-container region map.
///
/// The list is populated as a whole and never fetched per container. The
/// region map is only emptied by [`BucketCatalog::clear`].
#[derive(Debug)]
pub struct BucketCatalog {
    client: Arc<dyn ApiClient>,
    settings: Arc<Settings>,
    state: Mutex<ListState>,
    regions: Mutex<HashMap<String, Region>>,
}

impl BucketCatalog {
    pub fn new(client: Arc<dyn ApiClient>, settings: Arc<Settings>) -> Self {
        Self {
            client,
            settings,
            state: Mutex::new(ListState::default()),
            regions: Mutex::new(HashMap::new()),
        }
    }

    /// All visible containers.
    ///
    /// An empty list populated within the throttle window is returned as is
    /// without asking the backend again.
    pub async fn list_containers(&self) -> Result<Vec<EntryRef>> {
        let now = Utc::now();
        let cached = {
            let mut state = self.state.lock();
            if state.entries.is_empty() {
                if let Some(last_set) = state.last_set {
                    if now - last_set < self.settings.empty_list_throttle {
                        debug!(since = %last_set, "empty container list is fresh, not refetching");
                        return Ok(Vec::new());
                    }
                }
                None
            } else {
                state.last_get = Some(now);
                state.count_get += 1;
                Some(state.entries.clone())
            }
        };

        let entries = match cached {
            Some(entries) => entries,
            None => self.fetch().await?,
        };

        self.annotate(entries).await
    }

    async fn fetch(&self) -> Result<Vec<EntryRef>> {
        let containers = self.client.list_containers().await.map_err(|e| {
            warn!(error = %e, "failed to list containers");
            e
        })?;
        let total = containers.len();

        let mut entries: Vec<EntryRef> = containers
            .into_iter()
            .filter(|c| self.settings.container_allowed(&c.name))
            .map(|c| Arc::new(DirectoryEntry::container(c.name, c.creation_time)))
            .collect();

        let max = self.settings.max_display_containers;
        if max > 0 && entries.len() > max {
            entries.truncate(max);
        }
        debug!(total, visible = entries.len(), "fetched container list");

        let mut state = self.state.lock();
        state.entries = entries.clone();
        state.last_set = Some(Utc::now());
        state.count_set += 1;
        Ok(entries)
    }

    /// Mark containers outside the client's reachable regions as hidden.
    ///
    /// In strict mode every region is resolved, otherwise only regions
    /// already known are consulted.
    async fn annotate(&self, entries: Vec<EntryRef>) -> Result<Vec<EntryRef>> {
        let mut out = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let region = if self.settings.strict_container_region {
                match self.get_container_region(&entry.name).await {
                    Ok(region) => Some(region),
                    Err(e) => {
                        warn!(container = %entry.name, error = %e, "failed to resolve region");
                        Arc::make_mut(&mut entry).set_hidden();
                        out.push(entry);
                        continue;
                    }
                }
            } else {
                self.cached_region(&entry.name)
            };

            if let Some(region) = region {
                if !self.client.can_access_region(&region) {
                    Arc::make_mut(&mut entry).set_hidden();
                }
            }
            out.push(entry);
        }
        Ok(out)
    }

    fn cached_region(&self, name: &str) -> Option<Region> {
        self.regions.lock().get(name).cloned()
    }

    /// Region of a container, fetched once and then served from the map.
    pub async fn get_container_region(&self, name: &str) -> Result<Region> {
        if let Some(region) = self.cached_region(name) {
            return Ok(region);
        }

        let region = self.client.get_container_region(name).await?;
        debug!(container = name, region = %region, "resolved container region");
        self.regions.lock().insert(name.to_string(), region.clone());
        Ok(region)
    }

    /// The cached entry for `name`, or `None` when it is unknown or its
    /// region is not reachable by the client.
    pub async fn head_container(&self, name: &str) -> Result<Option<EntryRef>> {
        let region = self.get_container_region(name).await?;
        if !self.client.can_access_region(&region) {
            debug!(container = name, region = %region, "container region not accessible");
            return Ok(None);
        }

        let state = self.state.lock();
        Ok(state.entries.iter().find(|e| e.name == name).cloned())
    }

    /// Repopulate the list if it was last populated before `threshold`.
    /// Returns whether a reload happened.
    pub async fn reload(&self, threshold: DateTime<Utc>) -> Result<bool> {
        let stale = {
            let state = self.state.lock();
            state.last_set.map_or(true, |t| t < threshold)
        };
        if !stale {
            return Ok(false);
        }

        info!(threshold = %threshold, "reloading container list");
        self.clear_list();
        self.list_containers().await?;
        Ok(true)
    }

    fn clear_list(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.last_set = None;
        state.last_get = None;
        state.last_clear = Some(Utc::now());
        state.count_clear += 1;
    }

    /// Drop the container list and every known region.
    pub fn clear(&self) {
        self.clear_list();
        self.regions.lock().clear();
    }

    pub fn stats(&self) -> BucketCatalogStats {
        let regions = self.regions.lock().len();
        let state = self.state.lock();
        BucketCatalogStats {
            containers: state.entries.len(),
            regions,
            last_set: state.last_set,
            last_get: state.last_get,
            last_clear: state.last_clear,
            count_set: state.count_set,
            count_get: state.count_get,
            count_clear: state.count_clear,
        }
    }
}
