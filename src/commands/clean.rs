use anyhow::Result;

use super::InteractiveConfirm;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, yes: bool) -> Result<()> {
    let mut engine = super::engine(ctx)?;

    let mut confirm = InteractiveConfirm::new(yes, ctx.quiet);
    match engine.clean(&mut confirm)? {
        Some(report) => super::finish(ctx, &report),
        None => {
            ui::info("Clean cancelled, nothing was removed");
            Ok(())
        }
    }
}
