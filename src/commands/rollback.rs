use anyhow::Result;
use chrono::Local;
use plugkit::Operation;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let mut engine = super::engine(ctx)?;

    if !ctx.quiet
        && let Some(entry) = engine.journal().last(Operation::Update)?
    {
        ui::info(&format!(
            "Rolling back the update from {}",
            entry
                .timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
        ));
    }

    match engine.rollback()? {
        Some(report) => super::finish(ctx, &report),
        None => {
            ui::info(&format!(
                "No update recorded in {}",
                engine.journal().path().display()
            ));
            Ok(())
        }
    }
}
