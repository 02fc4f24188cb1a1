mod cli;

use clap::Parser;
use owo_colors::OwoColorize;

use cli::op::{Op, OpContext};
use cli::Args;
use objmount_daemon::{logging, AppConfig};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init(args.log_level.as_deref()) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(2);
    }

    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let ctx = match OpContext::load(config_path) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    };
    tracing::debug!(config = %ctx.config_path.display(), "configuration loaded");

    match args.command.execute(&ctx).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
