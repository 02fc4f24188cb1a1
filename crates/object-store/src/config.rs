//! Backend selection, deserialized from the `[backend]` table.

use std::sync::Arc;
use std::time::Duration;

use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::{ClientOptions, ObjectStore};
use serde::{Deserialize, Serialize};

use crate::client::ObjectStoreClient;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("container name must not be empty")]
    MissingContainer,
    #[error("failed to build object store: {0}")]
    Build(#[from] object_store::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local store, emptied on exit
    #[default]
    Memory,
    /// S3 or an S3-compatible service
    S3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// The single container served by this backend
    pub container: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            container: "objmount".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            allow_http: false,
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    /// Build the client. S3 credentials are read from the environment.
    pub fn build(&self) -> Result<ObjectStoreClient, BackendError> {
        if self.container.trim().is_empty() {
            return Err(BackendError::MissingContainer);
        }

        let store: Arc<dyn ObjectStore> = match self.kind {
            BackendKind::Memory => Arc::new(InMemory::new()),
            BackendKind::S3 => {
                let options =
                    ClientOptions::new().with_timeout(Duration::from_secs(self.timeout_secs));
                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(&self.container)
                    .with_region(&self.region)
                    .with_client_options(options);
                if let Some(endpoint) = &self.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_virtual_hosted_style_request(false);
                }
                if self.allow_http {
                    builder = builder.with_allow_http(true);
                }
                Arc::new(builder.build()?)
            }
        };

        tracing::info!(
            kind = ?self.kind,
            container = %self.container,
            region = %self.region,
            "object store backend ready"
        );
        Ok(ObjectStoreClient::new(
            store,
            self.container.clone(),
            self.region.clone(),
        ))
    }
}
