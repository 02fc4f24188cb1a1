use std::collections::BTreeMap;
use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::error::StorageError;
use common::path::ObjectPath;

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Rm {
    /// Objects or directories to delete; a directory loses its files first
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug)]
pub struct RmOutput {
    pub deleted: Vec<String>,
}

impl fmt::Display for RmOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} object(s)", "Deleted".green(), self.deleted.len())?;
        for path in &self.deleted {
            write!(f, "\n  {}", path.dimmed())?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RmError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Refusing to delete container {0}")]
    Container(String),
}

#[async_trait::async_trait]
impl Op for Rm {
    type Error = RmError;
    type Output = RmOutput;

    /// Paths are batched per container; a single path goes through the
    /// plain delete.
    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let facade = ctx.state.facade();
        let mut by_container: BTreeMap<String, Vec<ObjectPath>> = BTreeMap::new();
        for raw in &self.paths {
            let path = ObjectPath::parse(raw)?;
            if path.is_container() {
                return Err(RmError::Container(path.container().to_string()));
            }
            by_container
                .entry(path.container().to_string())
                .or_default()
                .push(path);
        }

        let mut deleted = Vec::new();
        for (container, paths) in by_container {
            if let [path] = paths.as_slice() {
                facade.delete_object(path).await?;
            } else {
                let keys: Vec<String> = paths.iter().map(|p| p.key().to_string()).collect();
                facade.delete_objects(&container, &keys).await?;
            }
            deleted.extend(paths.iter().map(ToString::to_string));
        }

        Ok(RmOutput { deleted })
    }
}
