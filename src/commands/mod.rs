pub mod add;
pub mod clean;
pub mod rollback;
pub mod snapshot;
pub mod status;
pub mod update;

use anyhow::{Context as _, Result};
use dialoguer::{Confirm, MultiSelect};
use plugkit::{ApplyReport, ConfirmCallback, Orchestrator, Plan, Selection};
use std::io::IsTerminal;

use crate::Context;
use crate::display;
use crate::progress::BatchProgress;

/// Build an engine from the loaded config and declare its plugins.
pub fn engine(ctx: &Context) -> Result<Orchestrator> {
    let config = ctx.config.engine_config()?;
    log::debug!("Package directory: {}", config.package_dir.display());

    let mut engine = Orchestrator::new(config)
        .context("Could not start the sync engine")?
        .with_progress(BatchProgress::new(ctx.quiet));
    engine
        .declare(&ctx.config.plugins)
        .with_context(|| format!("Invalid plugins in {}", ctx.config_path.display()))?;
    Ok(engine)
}

/// Print a report and turn partial failure into an error.
pub fn finish(ctx: &Context, report: &ApplyReport) -> Result<()> {
    if !ctx.quiet && !(report.outcomes.is_empty() && report.skipped.is_empty()) {
        display::display_report(report, ctx.verbose > 0);
    }
    report.check()?;
    Ok(())
}

/// Shows every plan and asks before applying.
pub struct InteractiveConfirm {
    assume_yes: bool,
    quiet: bool,
}

impl InteractiveConfirm {
    pub fn new(assume_yes: bool, quiet: bool) -> Self {
        Self { assume_yes, quiet }
    }
}

impl ConfirmCallback for InteractiveConfirm {
    fn preview(&mut self, plan: &Plan) {
        if !self.quiet {
            display::display_plan(plan);
        }
    }

    fn confirm(&mut self, plan: &Plan) -> plugkit::Result<Option<Selection>> {
        if self.assume_yes {
            return Ok(Some(Selection::All));
        }
        if !std::io::stdin().is_terminal() {
            return Err(plugkit::Error::Confirm(
                "stdin is not a terminal, pass --yes to apply without asking".into(),
            ));
        }

        let count = plan.summary().actionable();
        let all = Confirm::new()
            .with_prompt(format!("Apply {count} changes?"))
            .default(true)
            .interact()
            .map_err(prompt_error)?;
        if all {
            return Ok(Some(Selection::All));
        }

        let pick = Confirm::new()
            .with_prompt("Choose entries individually?")
            .default(false)
            .interact()
            .map_err(prompt_error)?;
        if !pick {
            return Ok(None);
        }

        let names: Vec<&str> = plan.actionable().map(|e| e.name.as_str()).collect();
        let items: Vec<String> = plan
            .actionable()
            .map(|e| format!("{} {}", e.kind, e.name))
            .collect();
        let chosen = MultiSelect::new()
            .with_prompt("Entries to apply")
            .items(&items)
            .interact()
            .map_err(prompt_error)?;

        if chosen.is_empty() {
            return Ok(None);
        }
        Ok(Some(Selection::only(chosen.into_iter().map(|i| names[i]))))
    }
}

fn prompt_error(e: dialoguer::Error) -> plugkit::Error {
    plugkit::Error::Confirm(e.to_string())
}
