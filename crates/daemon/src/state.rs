use std::sync::Arc;

use backend::{BackendConfig, BackendError};
use common::config::ConfigError;
use common::error::StorageError;
use common::facade::StorageFacade;
use common::worker::QueuedWorkerPool;

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("backend setup failed: {0}")]
    Backend(#[from] BackendError),
    #[error("worker pool setup failed: {0}")]
    Pool(#[from] StorageError),
}

/// Everything a command needs, built once from the configuration.
#[derive(Debug, Clone)]
pub struct AppState {
    facade: Arc<StorageFacade>,
    backend: BackendConfig,
}

impl AppState {
    /// Must be called inside a tokio runtime; the transfer workers are
    /// spawned on it.
    pub fn from_config(config: &AppConfig) -> Result<Self, StateError> {
        let settings = config.core.validate()?;
        let client = config.backend.build()?;
        let pool = QueuedWorkerPool::spawn(settings.transfer.worker_count)?;
        tracing::debug!(
            workers = pool.workers(),
            shadow_dir = %settings.shadow_dir.display(),
            "storage facade ready"
        );

        let facade = StorageFacade::new(Arc::new(client), Arc::new(pool), settings);
        Ok(Self {
            facade: Arc::new(facade),
            backend: config.backend.clone(),
        })
    }

    pub fn facade(&self) -> &Arc<StorageFacade> {
        &self.facade
    }

    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }
}
