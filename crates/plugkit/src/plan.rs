//! Change planning.
//!
//! A [`Plan`] is a pure value: one [`ChangeEntry`] per module describing what
//! applying it would do. Planning only reads repositories; fetching is done
//! beforehand by the orchestrator and its failures are passed in.
//!
//! | condition                          | kind     |
//! |------------------------------------|----------|
//! | module absent on disk              | `new`    |
//! | fetch or inspection failed         | `error`  |
//! | current commit == resolved target  | `same`   |
//! | current commit != resolved target  | `update` |
//! | on disk but not declared (clean)   | `delete` |

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::inspect::{CommitSummary, Inspector};
use crate::registry::Module;
use crate::spec::Spec;

/// Kind of change for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Update,
    Same,
    Delete,
    Error,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Update => "update",
            Self::Same => "same",
            Self::Delete => "delete",
            Self::Error => "error",
        }
    }

    /// Whether applying an entry of this kind mutates disk.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::New | Self::Update | Self::Delete)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [Self::New, Self::Update, Self::Same, Self::Delete, Self::Error]
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown change kind '{s}'"))
    }
}

/// Resolved checkout target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Target {
    /// Tip of a remote branch; the local branch is moved onto it
    Branch { name: String, commit: String },
    /// Tag or commit; checked out detached
    Revision { revision: String, commit: String },
}

impl Target {
    pub fn commit(&self) -> &str {
        match self {
            Self::Branch { commit, .. } | Self::Revision { commit, .. } => commit,
        }
    }

    /// Branch name or revision as configured.
    pub fn label(&self) -> &str {
        match self {
            Self::Branch { name, .. } => name,
            Self::Revision { revision, .. } => revision,
        }
    }
}

/// Planned change for one module.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEntry {
    pub name: String,
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub source: Option<String>,
    /// Commit before applying
    pub from: Option<String>,
    /// Commit after applying
    pub to: Option<String>,
    /// Commits in `from..to`, newest first
    pub commits: Vec<CommitSummary>,
    pub target: Option<Target>,
    /// Monitored branch, if any
    pub monitor: Option<String>,
    /// Commits on the monitored branch not yet checked out
    pub monitor_commits: Vec<CommitSummary>,
    pub error: Option<String>,
}

impl ChangeEntry {
    fn new(name: impl Into<String>, kind: ChangeKind, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            kind,
            path,
            source: None,
            from: None,
            to: None,
            commits: Vec::new(),
            target: None,
            monitor: None,
            monitor_commits: Vec::new(),
            error: None,
        }
    }

    fn failed(mut self, message: impl Into<String>) -> Self {
        self.kind = ChangeKind::Error;
        self.error = Some(message.into());
        self
    }
}

/// Operation a plan was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Update,
    Clean,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Update => "update",
            Self::Clean => "clean",
        })
    }
}

/// Counts per change kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub new: usize,
    pub update: usize,
    pub same: usize,
    pub delete: usize,
    pub error: usize,
}

impl PlanSummary {
    pub fn actionable(&self) -> usize {
        self.new + self.update + self.delete
    }
}

/// A reviewable change set.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub kind: PlanKind,
    pub entries: Vec<ChangeEntry>,
}

impl Plan {
    pub fn new(kind: PlanKind, entries: Vec<ChangeEntry>) -> Self {
        Self { kind, entries }
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for entry in &self.entries {
            match entry.kind {
                ChangeKind::New => summary.new += 1,
                ChangeKind::Update => summary.update += 1,
                ChangeKind::Same => summary.same += 1,
                ChangeKind::Delete => summary.delete += 1,
                ChangeKind::Error => summary.error += 1,
            }
        }
        summary
    }

    /// Entries that would mutate disk.
    pub fn actionable(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter().filter(|e| e.kind.is_actionable())
    }

    pub fn has_changes(&self) -> bool {
        self.actionable().next().is_some()
    }

    pub fn get(&self, name: &str) -> Option<&ChangeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Which entries of a plan to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Only(BTreeSet<String>),
}

impl Selection {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.contains(name),
        }
    }
}

/// Resolve the commit a module should be on.
///
/// An absent `checkout` or `HEAD` follows origin's default branch; a remote
/// branch name follows that branch; anything else is a tag or commit.
pub fn resolve_target(spec: &Spec, path: &Path, inspector: &dyn Inspector) -> Result<Target> {
    match spec.checkout.as_deref() {
        None | Some("HEAD") => {
            let branch = inspector.default_branch(path)?;
            let commit = inspector.resolve(path, &format!("origin/{branch}"))?;
            Ok(Target::Branch {
                name: branch,
                commit,
            })
        }
        Some(revision) => {
            let branches = inspector.remote_branches(path)?;
            if branches.iter().any(|b| b == revision) {
                let commit = inspector.resolve(path, &format!("origin/{revision}"))?;
                Ok(Target::Branch {
                    name: revision.to_string(),
                    commit,
                })
            } else {
                let commit = inspector.resolve(path, revision)?;
                Ok(Target::Revision {
                    revision: revision.to_string(),
                    commit,
                })
            }
        }
    }
}

/// Plan an update pass over `modules`.
///
/// `fetch_errors` maps module names to the failure of their fetch step.
pub fn plan_updates<'a, I>(
    modules: I,
    inspector: &dyn Inspector,
    fetch_errors: &HashMap<String, String>,
) -> Plan
where
    I: IntoIterator<Item = &'a Module>,
{
    let entries = modules
        .into_iter()
        .map(|module| classify(module, inspector, fetch_errors.get(module.name())))
        .collect();
    Plan::new(PlanKind::Update, entries)
}

fn classify(module: &Module, inspector: &dyn Inspector, fetch_error: Option<&String>) -> ChangeEntry {
    let spec = &module.spec;
    let mut entry = ChangeEntry::new(&spec.name, ChangeKind::Same, module.path.clone());
    entry.source.clone_from(&spec.source);
    entry.monitor.clone_from(&spec.monitor);

    if !inspector.is_module(&module.path) {
        if module.path.exists() {
            return entry.failed(
                Error::NotAModule {
                    path: module.path.clone(),
                }
                .to_string(),
            );
        }
        entry.kind = ChangeKind::New;
        if spec.source.is_none() {
            return entry.failed(format!("{} is not installed and has no source", spec.name));
        }
        return entry;
    }

    let current = match inspector.head(&module.path) {
        Ok(head) => head,
        Err(e) => return entry.failed(e.to_string()),
    };
    entry.from = Some(current.clone());

    if let Some(message) = fetch_error {
        return entry.failed(message.clone());
    }

    let target = match resolve_target(spec, &module.path, inspector) {
        Ok(target) => target,
        Err(e) => return entry.failed(e.to_string()),
    };

    if let Some(monitor) = &spec.monitor {
        match inspector.log(&module.path, &current, &format!("origin/{monitor}")) {
            Ok(commits) => entry.monitor_commits = commits,
            Err(e) => log::debug!("Cannot read monitor branch {monitor} of {}: {e}", spec.name),
        }
    }

    entry.to = Some(target.commit().to_string());
    if target.commit() != current {
        entry.kind = ChangeKind::Update;
        match inspector.log(&module.path, &current, target.commit()) {
            Ok(commits) => entry.commits = commits,
            Err(e) => log::debug!("Cannot list commits for {}: {e}", spec.name),
        }
    }
    entry.target = Some(target);
    entry
}

/// Plan removal of directories under `opt_dir` not named in `declared`.
pub fn plan_clean(
    declared: &HashSet<String>,
    opt_dir: &Path,
    inspector: &dyn Inspector,
) -> Result<Plan> {
    if !opt_dir.exists() {
        return Ok(Plan::new(PlanKind::Clean, Vec::new()));
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(opt_dir).map_err(|e| Error::io(opt_dir, e))? {
        let dir_entry = dir_entry.map_err(|e| Error::io(opt_dir, e))?;
        let path = dir_entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if declared.contains(&name) {
            continue;
        }

        let mut entry = ChangeEntry::new(name, ChangeKind::Delete, path);
        if inspector.is_module(&entry.path) {
            entry.from = inspector.head(&entry.path).ok();
            entry.source = inspector.remote_url(&entry.path).ok().flatten();
        }
        entries.push(entry);
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Plan::new(PlanKind::Clean, entries))
}
