use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::error::StorageError;
use common::facade::NotifyOutcome;

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Notify {
    /// Event id: `clear-cache` or `print-report`
    pub event: String,
}

#[derive(Debug)]
pub struct NotifyOutput(pub NotifyOutcome);

impl fmt::Display for NotifyOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            NotifyOutcome::Cleared { entries } => {
                write!(f, "{} {} cached entries", "Cleared".green(), entries)
            }
            NotifyOutcome::Report(report) => write!(
                f,
                "{} {} containers, {} heads, {} listings",
                "Cached:".bold(),
                report.buckets.containers,
                report.objects.heads.positive_entries,
                report.objects.listings.positive_entries
            ),
            NotifyOutcome::Ignored => write!(f, "{}", "Event ignored".dimmed()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[async_trait::async_trait]
impl Op for Notify {
    type Error = NotifyError;
    type Output = NotifyOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let outcome = ctx.state.facade().on_notify(&self.event).await?;
        Ok(NotifyOutput(outcome))
    }
}
