use std::fmt::Write;

use clap::Args;
use owo_colors::OwoColorize;

use common::entry::PROP_LAST_MODIFIED;
use common::error::StorageError;
use common::path::ObjectPath;

use crate::cli::op::{Op, OpContext};
use crate::cli::ops::ls::attribute_flags;

#[derive(Args, Debug, Clone)]
pub struct Stat {
    /// Object, directory or container path
    pub path: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StatError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl Op for Stat {
    type Error = StatError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let facade = ctx.state.facade();
        let path = ObjectPath::parse(&self.path)?;
        let entry = if path.is_container() {
            facade.head_container(path.container()).await?
        } else {
            facade.head_object(&path).await?
        };

        if self.json {
            return Ok(serde_json::to_string_pretty(entry.as_ref())?);
        }

        let time = |t: &chrono::DateTime<chrono::Utc>| t.to_rfc3339();
        let mut out = String::new();
        let _ = writeln!(out, "{}:", path.to_string().bold());
        let _ = writeln!(out, "  {} {:?}", "kind:".dimmed(), entry.kind);
        let _ = writeln!(out, "  {} {}", "size:".dimmed(), entry.size);
        let _ = writeln!(out, "  {} {}", "created:".dimmed(), time(&entry.creation_time));
        let _ = writeln!(out, "  {} {}", "accessed:".dimmed(), time(&entry.last_access_time));
        let _ = writeln!(out, "  {} {}", "written:".dimmed(), time(&entry.last_write_time));
        let _ = writeln!(out, "  {} {}", "changed:".dimmed(), time(&entry.change_time));
        if let Some(etag) = entry.etag() {
            let _ = writeln!(out, "  {} {}", "etag:".dimmed(), etag);
        }
        if let Some(modified) = entry.extra.get(PROP_LAST_MODIFIED) {
            let _ = writeln!(out, "  {} {}", "remote modified:".dimmed(), modified);
        }
        let _ = write!(
            out,
            "  {} {}",
            "attributes:".dimmed(),
            attribute_flags(entry.attributes)
        );
        Ok(out)
    }
}
