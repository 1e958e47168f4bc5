mod blueprint;
mod cli;
mod commands;
mod config;
mod engine;
mod expr;
mod hosts;
mod paths;
mod runner;
mod tasks;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
    pub config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The worker installs its own logger that forwards records as frames.
    if !matches!(cli.command, Command::Rpc { .. }) {
        init_logging(cli.verbose, cli.quiet);
    }

    let ctx = Context {
        quiet: cli.quiet,
        config: cli.config,
    };

    match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "orch", &mut io::stdout());
            Ok(())
        }
        Command::Rpc { level } => commands::internal::rpc(level),
        Command::GatherFacts => commands::internal::gather_facts(),
        Command::ApplyTask => commands::internal::apply_task(),
        Command::Checksum => commands::internal::checksum(),
    }
}

/// Initialize logging based on verbosity
fn init_logging(verbose: u8, quiet: bool) {
    let log_level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();
}
