use anyhow::Result;
use plugkit::SpecInput;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, plugins: &[String], save: bool) -> Result<()> {
    let inputs: Vec<SpecInput> = plugins.iter().map(|p| SpecInput::from(p.as_str())).collect();

    let mut engine = super::engine(ctx)?;
    let report = engine.add(&inputs)?;

    if report.outcomes.is_empty() && !ctx.quiet {
        ui::info("All requested plugins are already installed");
    }
    super::finish(ctx, &report)?;

    if save {
        let mut config = ctx.config.clone();
        let added = config.add_plugins(&inputs);
        if added > 0 {
            config.save_to(&ctx.config_path)?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Saved {added} plugins to {}",
                    ctx.config_path.display()
                ));
            }
        }
    }
    Ok(())
}
