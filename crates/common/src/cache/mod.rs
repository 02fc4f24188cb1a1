//! Metadata caches sitting between the facade and the backend.

pub mod bucket_catalog;
pub mod object_catalog;
pub mod ttl;

pub use bucket_catalog::{BucketCatalog, BucketCatalogStats};
pub use object_catalog::{ObjectCatalog, ObjectCatalogStats};
pub use ttl::{CacheEntry, CacheKey, TtlCache, TtlCacheStats};
