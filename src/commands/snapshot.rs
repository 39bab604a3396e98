use anyhow::Result;
use std::path::PathBuf;

use crate::Context;
use crate::cli::SnapshotCommand;
use crate::progress;
use crate::ui;

pub fn run(ctx: &Context, cmd: SnapshotCommand) -> Result<()> {
    match cmd {
        SnapshotCommand::Save { path } => save(ctx, path),
        SnapshotCommand::Load { path } => load(ctx, path),
    }
}

fn save(ctx: &Context, path: Option<PathBuf>) -> Result<()> {
    let mut engine = super::engine(ctx)?;

    let pb = (!ctx.quiet).then(|| progress::spinner("Reading module revisions..."));
    let (path, snapshot) = engine.snapshot_save(path.as_deref())?;
    if let Some(pb) = pb {
        progress::finish_success(
            &pb,
            &format!("Saved {} modules to {}", snapshot.len(), path.display()),
        );
    }

    let missing = engine.registry().len().saturating_sub(snapshot.len());
    if missing > 0 && !ctx.quiet {
        ui::warn(&format!("{missing} declared modules are not installed and were not recorded"));
    }
    Ok(())
}

fn load(ctx: &Context, path: Option<PathBuf>) -> Result<()> {
    let mut engine = super::engine(ctx)?;
    let report = engine.snapshot_load(path.as_deref())?;

    if report.outcomes.is_empty() && !ctx.quiet {
        ui::info("No declared module matched the snapshot");
    }
    super::finish(ctx, &report)
}
