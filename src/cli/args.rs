// ABOUTME: Command-line argument definitions
// ABOUTME: Subcommands: run a job, validate a definition, inspect a serial

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "foreman", version, about = "Job workflow execution engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a job definition against one or more targets.
    Run(RunArgs),

    /// Parse and validate a job definition without running it.
    Validate {
        /// Path to the job definition YAML.
        job: PathBuf,
    },

    /// Decode a serial and show its tier and hierarchy.
    Show {
        /// A job, execution, branch, or target serial.
        serial: String,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the job definition YAML.
    pub job: PathBuf,

    /// Target to run against, as `host` or `host:os`. Repeatable.
    #[arg(short, long = "target")]
    pub targets: Vec<String>,

    /// Variable override, as `name=value`. Repeatable.
    #[arg(short = 'V', long = "var", value_parser = parse_key_val)]
    pub vars: Vec<(String, String)>,

    /// Write the execution report as JSON to this path.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Validate and show the action order without executing anything.
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{s}'")),
    }
}
