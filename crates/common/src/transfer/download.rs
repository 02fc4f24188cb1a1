use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{PartDescriptor, TransferOperation};
use crate::api::ApiClient;
use crate::error::{Result, StorageError};
use crate::path::ObjectPath;

/// Ranged download of a remote object into an existing local file.
///
/// Parts write at their own offsets, so they may land in any order.
pub struct DownloadOperation {
    client: Arc<dyn ApiClient>,
    path: ObjectPath,
    output: PathBuf,
    size: u64,
}

impl DownloadOperation {
    pub fn new(client: Arc<dyn ApiClient>, path: ObjectPath, output: PathBuf, size: u64) -> Self {
        Self {
            client,
            path,
            output,
            size,
        }
    }

    async fn read_range(&self, offset: u64, length: u64) -> Result<()> {
        let written = self
            .client
            .get_object_range(&self.path, offset, length, &self.output)
            .await?;
        if written != length {
            return Err(StorageError::Inconsistent(format!(
                "{}: expected {} bytes at offset {}, got {}",
                self.path, length, offset, written
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for DownloadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "download({})", self.path)
    }
}

#[async_trait]
impl TransferOperation for DownloadOperation {
    type Part = ();

    async fn single_shot(&self) -> Result<()> {
        self.read_range(0, self.size).await
    }

    async fn transfer_part(&self, part: &PartDescriptor) -> Result<()> {
        self.read_range(part.offset, part.length).await
    }

    async fn complete(&self, _parts: Vec<(usize, ())>) -> Result<()> {
        Ok(())
    }
}
