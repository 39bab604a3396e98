//! Plan and report rendering

use colored::{ColoredString, Colorize};
use plugkit::{ApplyReport, ChangeEntry, ChangeKind, Plan, PlanKind};

use crate::ui;

/// Commits listed per entry before eliding the rest
const MAX_COMMITS: usize = 10;

/// Display a plan as a boxed table
pub fn display_plan(plan: &Plan) {
    let summary = plan.summary();
    if !plan.has_changes() && summary.error == 0 {
        println!();
        println!("  {} Everything is up to date", "✓".green());
        return;
    }

    let title = match plan.kind {
        PlanKind::Update => "Pending Updates",
        PlanKind::Clean => "Undeclared Modules",
    };

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        title.bold()
    );
    println!("│");

    for entry in &plan.entries {
        if entry.kind == ChangeKind::Same {
            continue;
        }
        println!(
            "│   {} {:<30} {}",
            symbol(entry.kind),
            entry.name,
            describe(entry).dimmed()
        );

        for commit in entry.commits.iter().take(MAX_COMMITS) {
            println!("│       {} {}", commit.hash.yellow(), commit.subject);
        }
        if entry.commits.len() > MAX_COMMITS {
            println!(
                "│       {}",
                format!("... {} more", entry.commits.len() - MAX_COMMITS).dimmed()
            );
        }

        if let Some(monitor) = &entry.monitor
            && !entry.monitor_commits.is_empty()
        {
            println!(
                "│       {}",
                format!("{} new on {monitor}:", entry.monitor_commits.len()).cyan()
            );
            for commit in entry.monitor_commits.iter().take(MAX_COMMITS) {
                println!("│       {} {}", commit.hash.dimmed(), commit.subject.dimmed());
            }
        }
    }
    println!("│");

    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} new, {} update, {} delete, {} unchanged, {} errors",
        summary.new.to_string().green(),
        summary.update.to_string().yellow(),
        summary.delete.to_string().red(),
        summary.same.to_string().dimmed(),
        if summary.error > 0 {
            summary.error.to_string().red()
        } else {
            summary.error.to_string().dimmed()
        }
    );
    println!("└─────────────────────────────────────────────────────┘");
}

/// Display the outcome of an apply pass
pub fn display_report(report: &ApplyReport, list_skipped: bool) {
    println!();
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!(
                "  {} {:<30} {}",
                "✓".green(),
                outcome.name,
                transition(
                    outcome.kind,
                    outcome.before.as_deref(),
                    outcome.after.as_deref()
                )
                .dimmed()
            ),
            Some(error) => println!("  {} {:<30} {}", "✗".red(), outcome.name, error.red()),
        }
    }
    if list_skipped {
        for name in &report.skipped {
            println!("  {} {:<30} {}", "⊘".dimmed(), name, "skipped".dimmed());
        }
    } else if !report.skipped.is_empty() {
        ui::dim(&format!("{} skipped (-v to list)", report.skipped.len()));
    }

    println!();
    let (applied, failed) = (report.applied(), report.failed());
    if failed == 0 {
        ui::success(&format!("{} applied to {applied} modules", report.operation));
    } else {
        ui::warn(&format!(
            "{} applied to {applied} modules, {failed} failed",
            report.operation
        ));
    }
}

fn symbol(kind: ChangeKind) -> ColoredString {
    match kind {
        ChangeKind::New => "+".green(),
        ChangeKind::Update => "~".yellow(),
        ChangeKind::Delete => "-".red(),
        ChangeKind::Error => "!".red(),
        ChangeKind::Same => "=".dimmed(),
    }
}

/// One-line description of a plan entry
pub fn describe(entry: &ChangeEntry) -> String {
    match entry.kind {
        ChangeKind::New => match &entry.source {
            Some(source) => format!("(not installed) → {source}"),
            None => "(not installed)".to_string(),
        },
        ChangeKind::Update => {
            let mut desc = transition(entry.kind, entry.from.as_deref(), entry.to.as_deref());
            if let Some(target) = &entry.target {
                desc.push_str(&format!(" ({})", target.label()));
            }
            desc
        }
        ChangeKind::Delete => format!("(will remove) {}", entry.path.display()),
        ChangeKind::Error => entry
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string()),
        ChangeKind::Same => ui::short_or(entry.from.as_deref(), "-"),
    }
}

fn transition(kind: ChangeKind, from: Option<&str>, to: Option<&str>) -> String {
    match kind {
        ChangeKind::New => format!("installed at {}", ui::short_or(to, "?")),
        ChangeKind::Delete => "removed".to_string(),
        _ => format!("{} → {}", ui::short_or(from, "?"), ui::short_or(to, "?")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugkit::Target;
    use std::path::PathBuf;

    fn entry(kind: ChangeKind) -> ChangeEntry {
        ChangeEntry {
            name: "telescope.nvim".into(),
            kind,
            path: PathBuf::from("/pkg/opt/telescope.nvim"),
            source: Some("https://github.com/nvim-telescope/telescope.nvim".into()),
            from: Some("1111111aaaa".into()),
            to: Some("2222222bbbb".into()),
            commits: Vec::new(),
            target: Some(Target::Branch {
                name: "master".into(),
                commit: "2222222bbbb".into(),
            }),
            monitor: None,
            monitor_commits: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_describe_update_shows_range_and_target() {
        assert_eq!(
            describe(&entry(ChangeKind::Update)),
            "1111111 → 2222222 (master)"
        );
    }

    #[test]
    fn test_describe_new_and_delete() {
        assert_eq!(
            describe(&entry(ChangeKind::New)),
            "(not installed) → https://github.com/nvim-telescope/telescope.nvim"
        );
        assert_eq!(
            describe(&entry(ChangeKind::Delete)),
            "(will remove) /pkg/opt/telescope.nvim"
        );
    }

    #[test]
    fn test_describe_error_uses_message() {
        let mut e = entry(ChangeKind::Error);
        e.error = Some("fetch timed out".into());
        assert_eq!(describe(&e), "fetch timed out");
    }
}
