use std::time::Duration;

use clap::Args;

use objmount_daemon::{run_hooks, HookSchedule, WatchSummary};

use crate::cli::op::{Op, OpContext};

/// Keep the caches fresh until interrupted with Ctrl-C.
#[derive(Args, Debug, Clone)]
pub struct Watch {
    /// Seconds between cache eviction passes
    #[arg(long, default_value_t = 60)]
    pub timer_secs: u64,

    /// Seconds between container reloads and shadow pruning
    #[arg(long, default_value_t = 600)]
    pub idle_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Periods must be at least one second")]
    ZeroPeriod,
}

#[async_trait::async_trait]
impl Op for Watch {
    type Error = WatchError;
    type Output = WatchSummary;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        if self.timer_secs == 0 || self.idle_secs == 0 {
            return Err(WatchError::ZeroPeriod);
        }
        let schedule = HookSchedule {
            timer: Duration::from_secs(self.timer_secs),
            idle: Duration::from_secs(self.idle_secs),
        };
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
            }
        };
        Ok(run_hooks(ctx.state.facade(), schedule, shutdown).await)
    }
}
