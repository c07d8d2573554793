// ABOUTME: CLI entry point: logging setup and subcommand dispatch
// ABOUTME: Verbosity flags map onto the tracing EnvFilter default

use clap::Parser;
use tracing_subscriber::EnvFilter;

use super::args::{Cli, Command};
use super::commands;

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "foreman=warn",
        1 => "foreman=info",
        2 => "foreman=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => commands::run(args).await,
        Command::Validate { job } => commands::validate(&job).await,
        Command::Show { serial } => commands::show(&serial),
    }
}
