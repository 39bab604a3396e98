mod cli;
mod commands;
mod config;
mod display;
mod paths;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

use crate::config::Config;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Config,
    /// Where `config` was read from and `add --save` writes to
    pub config_path: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        generate(shell, &mut Cli::command(), "plugsync", &mut io::stdout());
        return Ok(());
    }

    let config_path = config::resolve_path(cli.config.as_deref())?;
    let config = Config::load_from(&config_path)?;
    let quiet = cli.quiet || config.silent;

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
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

    log::debug!("Loaded config from {}", config_path.display());

    let ctx = Context {
        verbose: cli.verbose,
        quiet,
        config,
        config_path,
    };

    match cli.command {
        Command::Add { plugins, save } => commands::add::run(&ctx, &plugins, save),
        Command::Update {
            names,
            yes,
            offline,
        } => commands::update::run(&ctx, &names, yes, offline),
        Command::Clean { yes } => commands::clean::run(&ctx, yes),
        Command::Snapshot(cmd) => commands::snapshot::run(&ctx, cmd),
        Command::Rollback => commands::rollback::run(&ctx),
        Command::Status { json } => commands::status::run(&ctx, json),
        Command::Completions { .. } => Ok(()),
    }
}
