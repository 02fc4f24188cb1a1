use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::error::StorageError;
use common::path::ObjectPath;

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Mv {
    /// Existing object or empty directory
    pub from: String,

    /// New path in the same or another container
    pub to: String,
}

#[derive(Debug)]
pub struct MvOutput {
    pub from: String,
    pub to: String,
}

impl fmt::Display for MvOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", "Moved".green(), self.from, self.to.bold())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MvError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[async_trait::async_trait]
impl Op for Mv {
    type Error = MvError;
    type Output = MvOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let from = ObjectPath::parse(&self.from)?;
        let to = ObjectPath::parse(&self.to)?;
        ctx.state.facade().rename_object(&from, &to).await?;

        Ok(MvOutput {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
