use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "orch")]
#[command(version)]
#[command(about = "Apply declarative tasks to local, ssh and qubes hosts", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// User configuration file
    #[arg(long, global = true, env = "ORCH_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a blueprint to its hosts
    Apply(ApplyArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    // ========================================================================
    // Internal entry points, invoked on the target host
    // ========================================================================
    /// Serve tasks over stdin/stdout
    #[command(name = "_rpc", hide = true)]
    Rpc {
        /// Highest log level forwarded to the controller
        #[arg(long, default_value = "info")]
        level: log::LevelFilter,
    },

    /// Print this host's facts as JSON
    #[command(name = "_gather-facts", hide = true)]
    GatherFacts,

    /// Apply one task read as JSON from stdin
    #[command(name = "_apply-task", hide = true)]
    ApplyTask,

    /// Print the BLAKE3 hash of this executable
    #[command(name = "_checksum", hide = true)]
    Checksum,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Blueprint file or directory
    #[arg(short, long, value_name = "PATH")]
    pub file: PathBuf,

    /// Only apply these hosts (repeatable)
    #[arg(long = "host", value_name = "NAME")]
    pub hosts: Vec<String>,

    /// Only apply hosts with one of these tags (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Report what would change without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}
