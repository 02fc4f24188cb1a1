use clap::Args;
use comfy_table::Table;

use common::error::StorageError;
use common::facade::{CacheReport, NotifyEvent, NotifyOutcome};

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Report {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl Op for Report {
    type Error = ReportError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let facade = ctx.state.facade();
        let report = match facade.on_notify(NotifyEvent::PrintReport.as_str()).await? {
            NotifyOutcome::Report(report) => report,
            _ => facade.report(),
        };

        if self.json {
            return Ok(serde_json::to_string_pretty(&report)?);
        }
        Ok(render(&report))
    }
}

fn render(report: &CacheReport) -> String {
    let heads = &report.objects.heads;
    let listings = &report.objects.listings;

    let mut table = Table::new();
    table.set_header(vec!["CACHE", "ENTRIES", "NEGATIVE", "HITS", "GETS"]);
    table.add_row(vec![
        "containers".to_string(),
        report.buckets.containers.to_string(),
        "-".to_string(),
        "-".to_string(),
        report.buckets.count_get.to_string(),
    ]);
    for (name, stats) in [("heads", heads), ("listings", listings)] {
        table.add_row(vec![
            name.to_string(),
            stats.positive_entries.to_string(),
            stats.negative_entries.to_string(),
            (stats.positive_hits + stats.negative_hits).to_string(),
            stats.positive_gets.to_string(),
        ]);
    }
    format!(
        "{table}\npath locks: {}\nshadow dir: {}",
        report.path_locks,
        report.shadow_dir.display()
    )
}
