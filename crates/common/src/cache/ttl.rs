//! Positive/negative cache with creation and access timestamps.
//!
//! Eviction is cooperative: nothing expires on read. The owner calls
//! [`TtlCache::delete_older_than`] from a periodic hook.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::path::ObjectPath;

/// Keys that know their containing directory.
///
/// Deleting a key also deletes its parent, so a change under a directory
/// invalidates that directory's cached listing.
pub trait CacheKey: Clone + Eq + Hash + Debug {
    fn parent_key(&self) -> Option<Self>;
}

impl CacheKey for ObjectPath {
    fn parent_key(&self) -> Option<Self> {
        self.parent()
    }
}

/// A cached value and its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Number of times the entry has been served
    pub ref_count: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, now: DateTime<Utc>) -> Self {
        Self {
            value,
            created_at: now,
            last_accessed_at: now,
            ref_count: 0,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.ref_count += 1;
    }
}

/// Counters and sizes for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TtlCacheStats {
    pub positive_entries: usize,
    pub negative_entries: usize,
    pub positive_gets: u64,
    pub positive_hits: u64,
    pub positive_sets: u64,
    pub negative_checks: u64,
    pub negative_hits: u64,
    pub negative_adds: u64,
    pub deletes: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Inner<K, V> {
    positive: HashMap<K, CacheEntry<V>>,
    negative: HashMap<K, CacheEntry<()>>,
    stats: TtlCacheStats,
}

/// Cache holding, per key, either a value or a "known absent" marker.
///
/// Both maps sit behind one mutex, so a key is never positive and negative
/// at the same time.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    name: &'static str,
    inner: Mutex<Inner<K, V>>,
}

impl<K: CacheKey, V: Clone> TtlCache<K, V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                positive: HashMap::new(),
                negative: HashMap::new(),
                stats: TtlCacheStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_positive(&self, key: &K) -> Option<V> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.stats.positive_gets += 1;

        let value = inner.positive.get_mut(key).map(|entry| {
            entry.touch(now);
            entry.value.clone()
        });
        if value.is_some() {
            inner.stats.positive_hits += 1;
        }
        value
    }

    /// Store a value, replacing any negative marker for the key.
    pub fn set_positive(&self, key: K, value: V) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.negative.remove(&key);
        inner.positive.insert(key, CacheEntry::new(value, now));
        inner.stats.positive_sets += 1;
    }

    pub fn is_negative(&self, key: &K) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.stats.negative_checks += 1;

        let hit = match inner.negative.get_mut(key) {
            Some(entry) => {
                entry.touch(now);
                true
            }
            None => false,
        };
        if hit {
            inner.stats.negative_hits += 1;
        }
        hit
    }

    /// Mark a key absent, replacing any value for it.
    pub fn add_negative(&self, key: K) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.positive.remove(&key);
        inner.negative.insert(key, CacheEntry::new((), now));
        inner.stats.negative_adds += 1;
    }

    /// Remove `key` and its parent from both maps. Returns entries removed.
    pub fn delete_by_key(&self, key: &K) -> usize {
        let parent = key.parent_key();
        let mut inner = self.inner.lock();

        let mut removed = 0;
        for k in std::iter::once(key).chain(parent.as_ref()) {
            removed += usize::from(inner.positive.remove(k).is_some());
            removed += usize::from(inner.negative.remove(k).is_some());
        }
        inner.stats.deletes += removed as u64;
        drop(inner);

        if removed > 0 {
            tracing::trace!(cache = self.name, key = ?key, removed, "deleted cache entries");
        }
        removed
    }

    /// Remove entries created before `threshold`. Returns entries removed.
    pub fn delete_older_than(&self, threshold: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.positive.len() + inner.negative.len();

        inner.positive.retain(|_, e| e.created_at >= threshold);
        inner.negative.retain(|_, e| e.created_at >= threshold);

        let removed = before - (inner.positive.len() + inner.negative.len());
        inner.stats.evictions += removed as u64;
        drop(inner);

        if removed > 0 {
            tracing::debug!(cache = self.name, removed, threshold = %threshold, "evicted expired entries");
        }
        removed
    }

    /// Remove everything. Returns entries removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.positive.len() + inner.negative.len();
        inner.positive.clear();
        inner.negative.clear();
        removed
    }

    /// Entry bookkeeping for a positive key, without touching it.
    pub fn peek_entry(&self, key: &K) -> Option<CacheEntry<V>> {
        self.inner.lock().positive.get(key).cloned()
    }

    pub fn stats(&self) -> TtlCacheStats {
        let inner = self.inner.lock();
        TtlCacheStats {
            positive_entries: inner.positive.len(),
            negative_entries: inner.negative.len(),
            ..inner.stats.clone()
        }
    }
}
