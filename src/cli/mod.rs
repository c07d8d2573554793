// ABOUTME: Command-line interface module
// ABOUTME: Argument parsing, logging setup, and subcommand implementations

pub mod app;
pub mod args;
pub mod commands;
