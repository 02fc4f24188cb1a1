use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{PartDescriptor, TransferOperation};
use crate::api::{ApiClient, CompletedPart, SessionId};
use crate::entry::FileTimes;
use crate::error::{Result, StorageError};
use crate::path::ObjectPath;

/// Upload of a local file, as one put or as a multi-part session.
pub struct UploadOperation {
    client: Arc<dyn ApiClient>,
    path: ObjectPath,
    times: FileTimes,
    source: Option<PathBuf>,
    session: Mutex<Option<SessionId>>,
}

impl UploadOperation {
    /// `source` of `None` uploads an empty object.
    pub fn new(
        client: Arc<dyn ApiClient>,
        path: ObjectPath,
        times: FileTimes,
        source: Option<PathBuf>,
    ) -> Self {
        Self {
            client,
            path,
            times,
            source,
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> Result<SessionId> {
        self.session
            .lock()
            .clone()
            .ok_or_else(|| StorageError::Inconsistent(format!("no upload session for {}", self.path)))
    }

    fn source(&self) -> Result<&PathBuf> {
        self.source
            .as_ref()
            .ok_or_else(|| StorageError::Inconsistent(format!("no source file for {}", self.path)))
    }
}

impl fmt::Debug for UploadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upload({})", self.path)
    }
}

#[async_trait]
impl TransferOperation for UploadOperation {
    type Part = String;

    async fn single_shot(&self) -> Result<()> {
        self.client
            .put_object(&self.path, &self.times, self.source.as_deref())
            .await
    }

    async fn begin(&self, _parts: usize) -> Result<()> {
        let session = self.client.create_session(&self.path, &self.times).await?;
        tracing::debug!(path = %self.path, session = %session, "opened upload session");
        *self.session.lock() = Some(session);
        Ok(())
    }

    async fn transfer_part(&self, part: &PartDescriptor) -> Result<String> {
        let session = self.session()?;
        self.client
            .upload_part(
                &self.path,
                &session,
                part.index,
                self.source()?,
                part.offset,
                part.length,
            )
            .await
    }

    async fn complete(&self, parts: Vec<(usize, String)>) -> Result<()> {
        let session = self.session()?;
        let parts: Vec<CompletedPart> = parts
            .into_iter()
            .map(|(part_number, etag)| CompletedPart { part_number, etag })
            .collect();
        self.client
            .complete_session(&self.path, &session, &parts)
            .await
    }

    async fn abort(&self) -> Result<()> {
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };
        tracing::info!(path = %self.path, session = %session, "aborting upload session");
        self.client.abort_session(&self.path, &session).await
    }
}
