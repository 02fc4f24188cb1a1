//! [`common::api::ApiClient`] over the `object_store` crate.
//!
//! Each client serves exactly one container backed by one store, either
//! in memory or on S3 and S3-compatible services.

mod client;
mod config;

pub use client::{ObjectStoreClient, DIRECTORY_MARKER};
pub use config::{BackendConfig, BackendError, BackendKind};
