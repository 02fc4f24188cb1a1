//! Library side of the `objmount` binary: configuration loading, logging
//! setup, the wiring from config to a ready [`common::facade::StorageFacade`]
//! and the periodic hook loop.

pub mod config;
pub mod logging;
pub mod state;
pub mod watch;

pub use config::{AppConfig, AppConfigError};
pub use state::{AppState, StateError};
pub use watch::{run_hooks, HookSchedule, WatchSummary};
