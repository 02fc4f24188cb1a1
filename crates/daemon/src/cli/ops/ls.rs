use clap::Args;
use comfy_table::Table;

use common::entry::{DirectoryEntry, EntryKind, FileAttributes};
use common::error::StorageError;
use common::path::ObjectPath;

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Container or directory such as `photos/2024`; lists containers when omitted
    pub path: Option<String>,

    /// Include `.`, `..` and hidden entries
    #[arg(long, short)]
    pub all: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl Op for Ls {
    type Error = LsError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let facade = ctx.state.facade();
        let target = self
            .path
            .as_deref()
            .filter(|p| !p.trim().trim_matches(['/', '\\']).is_empty());

        let entries = match target {
            None => facade.list_containers().await?,
            Some(path) => {
                facade
                    .list_display_objects(&ObjectPath::parse(path)?.to_dir())
                    .await?
            }
        };
        let entries: Vec<&DirectoryEntry> = entries
            .iter()
            .map(|e| &**e)
            .filter(|e| self.all || !(e.is_hidden() || e.name == "." || e.name == ".."))
            .collect();

        if self.json {
            return Ok(serde_json::to_string_pretty(&entries)?);
        }

        if entries.is_empty() {
            return Ok("No entries found".to_string());
        }

        let mut table = Table::new();
        table.set_header(vec!["TYPE", "NAME", "SIZE", "MODIFIED", "ATTRS"]);
        for entry in entries {
            table.add_row(vec![
                kind_label(entry.kind).to_string(),
                entry.name.clone(),
                entry.size.to_string(),
                entry.last_write_time.format("%Y-%m-%d %H:%M:%S").to_string(),
                attribute_flags(entry.attributes),
            ]);
        }
        Ok(table.to_string())
    }
}

fn kind_label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Root => "root",
        EntryKind::Container => "container",
        EntryKind::Directory => "dir",
        EntryKind::File => "file",
    }
}

/// `d`, `h` and `r` flags, `-` where unset.
pub(crate) fn attribute_flags(attributes: FileAttributes) -> String {
    [
        (FileAttributes::DIRECTORY, 'd'),
        (FileAttributes::HIDDEN, 'h'),
        (FileAttributes::READONLY, 'r'),
    ]
    .iter()
    .map(|(bit, flag)| if attributes.contains(*bit) { *flag } else { '-' })
    .collect()
}
