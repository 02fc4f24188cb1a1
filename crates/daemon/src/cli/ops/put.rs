use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use clap::Args;
use owo_colors::OwoColorize;

use common::entry::FileTimes;
use common::error::StorageError;
use common::path::ObjectPath;

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Put {
    /// Local file to upload
    pub source: PathBuf,

    /// Destination object path; a trailing `/` keeps the source file name
    pub path: String,
}

#[derive(Debug)]
pub struct PutOutput {
    pub path: String,
    pub size: u64,
}

impl fmt::Display for PutOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} bytes to {}",
            "Uploaded".green(),
            self.size,
            self.path.bold()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),
}

#[async_trait::async_trait]
impl Op for Put {
    type Error = PutError;
    type Output = PutOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let meta = tokio::fs::metadata(&self.source)
            .await
            .map_err(|source| PutError::Read {
                path: self.source.clone(),
                source,
            })?;
        if !meta.is_file() {
            return Err(PutError::NotAFile(self.source.clone()));
        }

        let mut path = ObjectPath::parse(&self.path)?;
        if path.is_dir() {
            let name = self
                .source
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| PutError::NotAFile(self.source.clone()))?;
            path = path.join(name, false)?;
        }

        ctx.state
            .facade()
            .put_object(&path, &local_times(&meta), Some(&self.source))
            .await?;

        Ok(PutOutput {
            path: path.to_string(),
            size: meta.len(),
        })
    }
}

/// Creation and access times fall back to the modification time where the
/// platform does not report them.
fn local_times(meta: &std::fs::Metadata) -> FileTimes {
    let modified: DateTime<Utc> = meta
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now());
    let or_modified = |t: std::io::Result<SystemTime>| t.map(DateTime::from).unwrap_or(modified);

    FileTimes {
        creation: or_modified(meta.created()),
        last_access: or_modified(meta.accessed()),
        last_write: modified,
        change: modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::op::test_context;

    #[tokio::test]
    async fn test_put_keeps_local_mtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = test_context(dir.path());
        let source = dir.path().join("notes.md");
        std::fs::write(&source, b"# notes\n").unwrap();
        let mtime: DateTime<Utc> = std::fs::metadata(&source).unwrap().modified().unwrap().into();

        let out = Put {
            source,
            path: "scratch/docs/readme.md".into(),
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert_eq!(out.path, "scratch/docs/readme.md");
        assert_eq!(out.size, 8);

        let entry = ctx
            .state
            .facade()
            .head_object(&ObjectPath::parse("scratch/docs/readme.md").unwrap())
            .await
            .unwrap();
        assert_eq!(entry.size, 8);
        assert_eq!(entry.last_write_time, mtime);
    }

    #[tokio::test]
    async fn test_put_into_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = test_context(dir.path());
        let source = dir.path().join("a.bin");
        std::fs::write(&source, [7u8; 3]).unwrap();

        let out = Put {
            source,
            path: "scratch/inbox/".into(),
        }
        .execute(&ctx)
        .await
        .unwrap();
        assert_eq!(out.path, "scratch/inbox/a.bin");
    }

    #[tokio::test]
    async fn test_put_rejects_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = test_context(dir.path());
        let err = Put {
            source: dir.path().to_path_buf(),
            path: "scratch/x".into(),
        }
        .execute(&ctx)
        .await
        .unwrap_err();
        assert!(matches!(err, PutError::NotAFile(_)));
    }
}
