pub mod op;
pub mod ops;

use std::path::PathBuf;

use clap::Parser;

crate::command_enum! {
    (Ls, ops::Ls),
    (Stat, ops::Stat),
    (Get, ops::Get),
    (Put, ops::Put),
    (Rm, ops::Rm),
    (Mv, ops::Mv),
    (Report, ops::Report),
    (Notify, ops::Notify),
    (Watch, ops::Watch),
}

#[derive(Parser, Debug)]
#[command(name = "objmount", version, about = "Browse and sync object storage through a local metadata cache")]
pub struct Args {
    /// Path to config.toml
    #[arg(long, global = true, env = "OBJMOUNT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter such as `debug` or `objmount_common=trace`; overrides RUST_LOG
    #[arg(long, global = true, env = "OBJMOUNT_LOG")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}
