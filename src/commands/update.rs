use anyhow::Result;

use super::InteractiveConfirm;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, names: &[String], yes: bool, offline: bool) -> Result<()> {
    let mut engine = super::engine(ctx)?;
    let names = (!names.is_empty()).then_some(names);

    let mut confirm = InteractiveConfirm::new(yes, ctx.quiet);
    match engine.update(names, offline, &mut confirm)? {
        Some(report) => super::finish(ctx, &report),
        None => {
            ui::info("Update cancelled, nothing was changed");
            Ok(())
        }
    }
}
