use anyhow::{Context as _, Result};
use colored::Colorize;
use plugkit::{InstallStatus, Module, Operation};
use serde::Serialize;
use std::path::Path;

use crate::Context;
use crate::ui;

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    package: &'a Path,
    modules: Vec<ModuleStatus<'a>>,
    /// Directories under opt that no plugin declares
    undeclared: Vec<String>,
    last_update: Option<String>,
}

#[derive(Debug, Serialize)]
struct ModuleStatus<'a> {
    name: &'a str,
    source: Option<&'a str>,
    checkout: Option<&'a str>,
    monitor: Option<&'a str>,
    status: &'a InstallStatus,
    commit: Option<&'a str>,
    path: &'a Path,
}

impl<'a> From<&'a Module> for ModuleStatus<'a> {
    fn from(module: &'a Module) -> Self {
        Self {
            name: module.name(),
            source: module.spec.source.as_deref(),
            checkout: module.spec.checkout.as_deref(),
            monitor: module.spec.monitor.as_deref(),
            status: &module.status,
            commit: module.commit.as_deref(),
            path: &module.path,
        }
    }
}

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let mut engine = super::engine(ctx)?;

    let clean = engine.plan_clean()?;
    let undeclared: Vec<String> = clean.entries.iter().map(|e| e.name.clone()).collect();
    engine.cancel(clean);

    let last_update = engine
        .journal()
        .last(Operation::Update)?
        .map(|e| e.timestamp.to_rfc3339());

    let registry = engine.refresh();
    let report = StatusReport {
        package: registry
            .opt_dir()
            .parent()
            .unwrap_or_else(|| registry.opt_dir()),
        modules: registry.iter().map(ModuleStatus::from).collect(),
        undeclared,
        last_update,
    };

    if json {
        let out =
            serde_json::to_string_pretty(&report).context("Failed to serialize status")?;
        println!("{out}");
        return Ok(());
    }

    display(ctx, &report);
    Ok(())
}

fn display(ctx: &Context, report: &StatusReport<'_>) {
    ui::header("Plugin Status");
    ui::kv("Config", &ctx.config_path.display().to_string());
    ui::kv("Package", &report.package.display().to_string());
    ui::kv(
        "Last update",
        report.last_update.as_deref().unwrap_or("never"),
    );

    if report.modules.is_empty() {
        println!();
        ui::dim("No plugins declared");
    } else {
        println!();
        for module in &report.modules {
            let (symbol, state) = match module.status {
                InstallStatus::Present => ("✓".green(), ui::short_or(module.commit, "?")),
                InstallStatus::Absent => ("○".yellow(), "not installed".to_string()),
                InstallStatus::Error(msg) => ("✗".red(), msg.clone()),
            };
            let pin = module
                .checkout
                .map(|c| format!(" @ {c}"))
                .unwrap_or_default();
            println!(
                "  {} {:<30} {}{}",
                symbol,
                module.name,
                state.dimmed(),
                pin.cyan()
            );
        }
    }

    let present = report
        .modules
        .iter()
        .filter(|m| matches!(m.status, InstallStatus::Present))
        .count();
    println!();
    ui::kv(
        "Installed",
        &format!("{present}/{}", report.modules.len()),
    );

    if !report.undeclared.is_empty() {
        ui::warn(&format!(
            "{} undeclared modules in opt: {} (run `plugsync clean`)",
            report.undeclared.len(),
            report.undeclared.join(", ")
        ));
    }
}
