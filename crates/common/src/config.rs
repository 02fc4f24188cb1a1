//! Configuration for the storage core.
//!
//! [`Config`] is the on-disk TOML shape. Every field has a default, so an
//! empty or missing file is valid. [`Config::validate`] clamps numeric knobs
//! into their supported ranges and compiles the pattern lists into
//! [`Settings`], the value the core components actually read.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub listing: ListingConfig,
    pub transfer: TransferConfig,
    pub shadow: ShadowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Container list older than this is reloaded by the idle hook
    pub bucket_cache_expiry_min: i64,
    /// Object head/listing entries older than this are evicted by the timer hook
    pub object_cache_expiry_min: i64,
    /// An empty container list is trusted for this long before asking again
    pub empty_list_throttle_secs: i64,
    /// Shadow files untouched for this long are pruned by the idle hook
    pub shadow_file_retention_min: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bucket_cache_expiry_min: 20,
            object_cache_expiry_min: 5,
            empty_list_throttle_secs: 60,
            shadow_file_retention_min: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Wildcard patterns (`*`, `?`) selecting visible containers; empty means all
    pub container_filters: Vec<String>,
    /// Regex matched against `/container/key`; matching entries are not listed
    pub ignore_file_name_patterns: Option<String>,
    /// 0 means unlimited
    pub max_display_containers: usize,
    /// 0 means unlimited
    pub max_display_objects: usize,
    /// Timestamp for prefix entries when a listing has no files to borrow one from
    pub default_prefix_time: DateTime<Utc>,
    pub strict_container_region: bool,
    pub strict_file_timestamp: bool,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            container_filters: Vec::new(),
            ignore_file_name_patterns: None,
            max_display_containers: 8,
            max_display_objects: 1000,
            default_prefix_time: DateTime::<Utc>::default(),
            strict_container_region: false,
            strict_file_timestamp: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub part_size_mib: u64,
    pub single_shot_threshold_mib: u64,
    pub worker_count: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size_mib: 10,
            single_shot_threshold_mib: 10,
            worker_count: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Defaults to the platform cache directory
    pub cache_dir: Option<PathBuf>,
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Clamp every knob into range and compile patterns.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let cache = &self.cache;
        let listing = &self.listing;
        let transfer = &self.transfer;

        let container_filters = listing
            .container_filters
            .iter()
            .map(|p| wildcard_to_regex(p))
            .collect::<Result<Vec<_>, _>>()?;

        let ignore_pattern = match listing.ignore_file_name_patterns.as_deref() {
            Some(p) if !p.trim().is_empty() => Some(compile(p)?),
            _ => None,
        };

        Ok(Settings {
            bucket_cache_expiry: Duration::minutes(cache.bucket_cache_expiry_min.clamp(1, 1440)),
            object_cache_expiry: Duration::minutes(cache.object_cache_expiry_min.clamp(1, 60)),
            empty_list_throttle: Duration::seconds(cache.empty_list_throttle_secs.clamp(0, 3600)),
            shadow_file_retention: Duration::minutes(
                cache.shadow_file_retention_min.clamp(1, 10080),
            ),
            container_filters,
            ignore_pattern,
            max_display_containers: listing.max_display_containers,
            max_display_objects: listing.max_display_objects,
            default_prefix_time: listing.default_prefix_time,
            strict_container_region: listing.strict_container_region,
            strict_file_timestamp: listing.strict_file_timestamp,
            transfer: TransferSettings {
                part_size: transfer.part_size_mib.clamp(5, 100) * MIB,
                single_shot_threshold: transfer.single_shot_threshold_mib.clamp(1, 1024) * MIB,
                worker_count: transfer.worker_count.clamp(1, 64),
            },
            shadow_dir: self
                .shadow
                .cache_dir
                .clone()
                .unwrap_or_else(default_shadow_dir),
        })
    }
}

/// Validated runtime settings shared by the core components.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bucket_cache_expiry: Duration,
    pub object_cache_expiry: Duration,
    pub empty_list_throttle: Duration,
    pub shadow_file_retention: Duration,
    pub container_filters: Vec<Regex>,
    pub ignore_pattern: Option<Regex>,
    pub max_display_containers: usize,
    pub max_display_objects: usize,
    pub default_prefix_time: DateTime<Utc>,
    pub strict_container_region: bool,
    pub strict_file_timestamp: bool,
    pub transfer: TransferSettings,
    pub shadow_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        let listing = ListingConfig::default();
        Self {
            bucket_cache_expiry: Duration::minutes(defaults.bucket_cache_expiry_min),
            object_cache_expiry: Duration::minutes(defaults.object_cache_expiry_min),
            empty_list_throttle: Duration::seconds(defaults.empty_list_throttle_secs),
            shadow_file_retention: Duration::minutes(defaults.shadow_file_retention_min),
            container_filters: Vec::new(),
            ignore_pattern: None,
            max_display_containers: listing.max_display_containers,
            max_display_objects: listing.max_display_objects,
            default_prefix_time: listing.default_prefix_time,
            strict_container_region: listing.strict_container_region,
            strict_file_timestamp: listing.strict_file_timestamp,
            transfer: TransferSettings::default(),
            shadow_dir: default_shadow_dir(),
        }
    }
}

impl Settings {
    /// True if the container passes the allow-list (an empty list allows all).
    pub fn container_allowed(&self, name: &str) -> bool {
        self.container_filters.is_empty() || self.container_filters.iter().any(|r| r.is_match(name))
    }

    /// True if the `/container/key` form matches the ignore pattern.
    pub fn is_ignored(&self, fs_path: &str) -> bool {
        self.ignore_pattern
            .as_ref()
            .is_some_and(|r| r.is_match(fs_path))
    }
}

/// Part sizing for chunked transfers, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    pub part_size: u64,
    /// Sizes at or below this move in one call
    pub single_shot_threshold: u64,
    pub worker_count: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            part_size: 10 * MIB,
            single_shot_threshold: 10 * MIB,
            worker_count: 4,
        }
    }
}

fn default_shadow_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "objmount")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("objmount"))
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Convert a `*`/`?` wildcard into an anchored, case-insensitive regex.
fn wildcard_to_regex(pattern: &str) -> Result<Regex, ConfigError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.trim().chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    compile(&re)
}
