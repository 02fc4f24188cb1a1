//! Drives the facade's timer and idle hooks until shutdown.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use owo_colors::OwoColorize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use common::facade::StorageFacade;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSchedule {
    /// Period of [`StorageFacade::on_timer`]
    pub timer: Duration,
    /// Period of [`StorageFacade::on_idle`]
    pub idle: Duration,
}

impl Default for HookSchedule {
    fn default() -> Self {
        Self {
            timer: Duration::from_secs(60),
            idle: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub timer_runs: u64,
    pub idle_runs: u64,
    pub evicted: usize,
    pub pruned_files: usize,
}

impl fmt::Display for WatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", "Watch stopped".bold())?;
        writeln!(f, "  {} {}", "timer passes:".dimmed(), self.timer_runs)?;
        writeln!(f, "  {} {}", "idle passes:".dimmed(), self.idle_runs)?;
        writeln!(f, "  {} {}", "entries evicted:".dimmed(), self.evicted)?;
        write!(f, "  {} {}", "shadow files pruned:".dimmed(), self.pruned_files)
    }
}

/// Run both hooks on their periods until `shutdown` resolves.
///
/// The first tick of each interval is skipped, so nothing runs at start.
/// A failing idle pass is logged and the loop continues.
pub async fn run_hooks<F>(
    facade: &StorageFacade,
    schedule: HookSchedule,
    shutdown: F,
) -> WatchSummary
where
    F: Future<Output = ()>,
{
    let mut timer = tokio::time::interval(schedule.timer);
    let mut idle = tokio::time::interval(schedule.idle);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    idle.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer.tick().await;
    idle.tick().await;

    info!(
        timer_secs = schedule.timer.as_secs(),
        idle_secs = schedule.idle.as_secs(),
        "watching caches"
    );

    let mut summary = WatchSummary::default();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            _ = timer.tick() => {
                summary.evicted += facade.on_timer();
                summary.timer_runs += 1;
            }
            _ = idle.tick() => {
                match facade.on_idle().await {
                    Ok(pass) => {
                        debug!(
                            reloaded = pass.containers_reloaded,
                            files = pass.pruned.files,
                            dirs = pass.pruned.dirs,
                            "idle pass"
                        );
                        summary.pruned_files += pass.pruned.files;
                    }
                    Err(e) => warn!(error = %e, "idle pass failed"),
                }
                summary.idle_runs += 1;
            }
        }
    }
    summary
}
