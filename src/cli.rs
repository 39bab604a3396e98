use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plugsync")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Install, update, snapshot and roll back git-sourced plugins", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: <config dir>/plugsync.toml)
    #[arg(short, long, global = true, env = "PLUGSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install plugins and their dependencies
    Add {
        /// Plugins as `user/repo`, full URLs, or installed module names
        #[arg(required = true)]
        plugins: Vec<String>,

        /// Also record the plugins in the config file
        #[arg(short, long)]
        save: bool,
    },

    /// Fetch, review and apply updates
    Update {
        /// Only update these modules
        names: Vec<String>,

        /// Apply without asking
        #[arg(short, long)]
        yes: bool,

        /// Plan from local state without fetching
        #[arg(long)]
        offline: bool,
    },

    /// Remove installed modules that are no longer declared
    Clean {
        /// Remove without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Save or restore exact revisions
    #[command(subcommand)]
    Snapshot(SnapshotCommand),

    /// Restore revisions from before the last update
    Rollback,

    /// Show declared modules and their install state
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// Record the current revision of every installed module
    Save {
        /// Output file (default: path.snapshot)
        path: Option<PathBuf>,
    },

    /// Check out the revisions recorded in a snapshot
    Load {
        /// Snapshot file (default: path.snapshot)
        path: Option<PathBuf>,
    },
}
