use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use common::error::StorageError;
use common::path::ObjectPath;
use common::shadow::SyncAction;

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Get {
    /// Object path such as `photos/2024/beach.jpg`
    pub path: String,

    /// Also copy the materialized file here
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug)]
pub struct GetOutput {
    pub path: String,
    pub local: PathBuf,
    pub size: u64,
    pub action: SyncAction,
    pub copied_to: Option<PathBuf>,
}

impl fmt::Display for GetOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            SyncAction::Reuse => "cached".dimmed().to_string(),
            SyncAction::Truncate => "empty".yellow().to_string(),
            SyncAction::Download => "downloaded".green().to_string(),
        };
        write!(
            f,
            "{} -> {} ({} bytes, {})",
            self.path.bold(),
            self.local.display(),
            self.size,
            action
        )?;
        if let Some(dest) = &self.copied_to {
            write!(f, "\n  {} {}", "copied to:".dimmed(), dest.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GetError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to copy to {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait::async_trait]
impl Op for Get {
    type Error = GetError;
    type Output = GetOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let path = ObjectPath::parse(&self.path)?;
        let shadow = ctx.state.facade().materialize(&path).await?;

        if let Some(dest) = &self.output {
            tokio::fs::copy(&shadow.local, dest)
                .await
                .map_err(|source| GetError::Copy {
                    path: dest.clone(),
                    source,
                })?;
        }

        Ok(GetOutput {
            path: path.to_string(),
            local: shadow.local,
            size: shadow.entry.size,
            action: shadow.action,
            copied_to: self.output.clone(),
        })
    }
}
