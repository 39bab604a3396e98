//! Workflow orchestration.
//!
//! The [`Orchestrator`] owns the registry, the job runner and the update log,
//! and drives every user-facing workflow through a small state machine:
//!
//! ```text
//! Idle -> Expanding -> Installing ----------------------------> Done      (add)
//! Idle -> Expanding -> Planning -> AwaitingConfirm -> Applying -> Done    (update, clean)
//!                                        |
//!                                        +-> Idle                          (cancel)
//! Installing / Applying -> Failed                                          (batch-level error)
//! ```
//!
//! Orchestration is single-threaded. It blocks only while a batch runs on the
//! job pool and while a [`ConfirmCallback`] reviews a plan.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::context::ConfirmCallback;
use crate::error::{Error, Result};
use crate::expand::expand_all;
use crate::git::Git;
use crate::hooks::{HookContext, HookEvent, Hooks};
use crate::inspect::Inspector;
use crate::job::{self, JobRunner, NoProgress, Progress};
use crate::journal::{Journal, JournalEntry, JournalRow, Operation, RowStatus};
use crate::plan::{self, ChangeKind, Plan, PlanKind, Selection, Target};
use crate::registry::{Module, Registry};
use crate::snapshot::Snapshot;
use crate::spec::{DEFAULT_URL_FORMAT, Normalizer, Spec, SpecInput};

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Concurrency ceiling for subprocess jobs
    pub n_threads: usize,
    /// Per-job deadline
    pub timeout: Duration,
    /// Root of the managed tree; modules live in `<package_dir>/opt`
    pub package_dir: PathBuf,
    /// Default snapshot file
    pub snapshot_path: PathBuf,
    /// Update log file
    pub log_path: PathBuf,
    /// Git executable
    pub git_cmd: String,
    /// Expansion for `user/repo` shorthands
    pub url_format: String,
}

impl EngineConfig {
    pub fn new(package_dir: impl Into<PathBuf>) -> Self {
        let package_dir = package_dir.into();
        Self {
            n_threads: job::default_threads(),
            timeout: job::DEFAULT_TIMEOUT,
            snapshot_path: package_dir.join("snapshot"),
            log_path: package_dir.join("update.log"),
            package_dir,
            git_cmd: "git".to_string(),
            url_format: DEFAULT_URL_FORMAT.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_threads == 0 {
            return Err(Error::Config("job.n_threads must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("job.timeout must be greater than zero".into()));
        }
        if self.git_cmd.trim().is_empty() {
            return Err(Error::Config("git.cmd must not be empty".into()));
        }
        if self.package_dir.as_os_str().is_empty() {
            return Err(Error::Config("path.package must not be empty".into()));
        }
        Ok(())
    }
}

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Expanding,
    Installing,
    Planning,
    AwaitingConfirm,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Expanding => "expanding",
            Self::Installing => "installing",
            Self::Planning => "planning",
            Self::AwaitingConfirm => "awaiting-confirm",
            Self::Applying => "applying",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Result of applying one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub name: String,
    pub kind: ChangeKind,
    pub before: Option<String>,
    pub after: Option<String>,
    pub error: Option<String>,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-module results of a mutating workflow, in dependency order.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub operation: Operation,
    pub outcomes: Vec<Outcome>,
    /// Names left untouched (not selected, not actionable, or already present)
    pub skipped: Vec<String>,
}

impl ApplyReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.applied()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    /// `PartiallyApplied` when any entry failed.
    pub fn check(&self) -> Result<()> {
        let names: Vec<String> = self.failures().map(|o| o.name.clone()).collect();
        if names.is_empty() {
            return Ok(());
        }
        Err(Error::PartiallyApplied {
            applied: self.applied(),
            failed: names.len(),
            names,
        })
    }

    fn rows(&self) -> Vec<JournalRow> {
        self.outcomes
            .iter()
            .map(|o| JournalRow {
                kind: o.kind,
                name: o.name.clone(),
                before: o.before.clone(),
                after: o.after.clone(),
                status: match &o.error {
                    Some(e) => RowStatus::Failed(e.clone()),
                    None => RowStatus::Ok,
                },
            })
            .collect()
    }
}

type Failures = HashMap<String, String>;

/// The synchronization engine.
pub struct Orchestrator {
    config: EngineConfig,
    normalizer: Normalizer,
    git: Git,
    runner: JobRunner,
    registry: Registry,
    journal: Journal,
    progress: Box<dyn Progress>,
    state: State,
    unlogged: Option<ApplyReport>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("modules", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Validate `config` and build an idle engine with an empty registry.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let normalizer = Normalizer::new(config.url_format.clone())?;
        let git = Git::new(config.git_cmd.clone()).with_timeout(config.timeout);
        let runner = JobRunner::new(config.n_threads)?;
        let registry = Registry::new(&config.package_dir);
        let journal = Journal::new(config.log_path.clone());

        Ok(Self {
            config,
            normalizer,
            git,
            runner,
            registry,
            journal,
            progress: Box::new(NoProgress),
            state: State::Idle,
            unlogged: None,
        })
    }

    /// Report job completions to `progress`.
    pub fn with_progress(mut self, progress: impl Progress + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn inspector(&self) -> &dyn Inspector {
        &self.git
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// The last report whose changes reached disk but not the update log.
    pub fn take_unlogged(&mut self) -> Option<ApplyReport> {
        self.unlogged.take()
    }

    /// Attach hooks to a registered module, overwriting the events `hooks` sets.
    pub fn set_hooks(&mut self, name: &str, hooks: &Hooks) -> Result<()> {
        let module = self
            .registry
            .get_mut(name)
            .ok_or_else(|| Error::UnknownModule(name.to_string()))?;
        module.spec.hooks.merge(hooks);
        Ok(())
    }

    fn transition(&mut self, next: State) {
        log::debug!("Orchestrator {} -> {}", self.state, next);
        self.state = next;
    }

    /// Normalize, expand and register specs without touching disk.
    ///
    /// Returns the expanded names in dependency order. Fails with
    /// `InvalidSpec` before anything is registered when a module has neither
    /// a source nor an installed copy.
    pub fn declare(&mut self, inputs: &[SpecInput]) -> Result<Vec<String>> {
        let specs = inputs
            .iter()
            .map(|input| self.normalizer.normalize(input))
            .collect::<Result<Vec<_>>>()?;
        let expanded = expand_all(&specs);

        for spec in &expanded {
            let has_source = spec.source.is_some()
                || self
                    .registry
                    .get(&spec.name)
                    .is_some_and(|m| m.spec.source.is_some());
            if !has_source && !self.git.is_module(&self.registry.path_for(&spec.name)) {
                return Err(Error::invalid_spec(
                    &spec.name,
                    "no source given and not installed",
                ));
            }
        }

        let names = expanded.iter().map(|s| s.name.clone()).collect();
        for spec in expanded {
            self.registry.register(spec).refresh(&self.git);
        }
        Ok(names)
    }

    /// Register specs and install every absent module.
    ///
    /// Modules whose directory already exists are skipped without checking
    /// their revision.
    pub fn add(&mut self, inputs: &[SpecInput]) -> Result<ApplyReport> {
        self.transition(State::Expanding);
        let names = match self.declare(inputs) {
            Ok(names) => names,
            Err(e) => {
                self.transition(State::Idle);
                return Err(e);
            }
        };

        self.transition(State::Installing);
        let (absent, present): (Vec<String>, Vec<String>) = names
            .into_iter()
            .partition(|name| !self.registry.path_for(name).exists());
        for name in &present {
            log::debug!("{name} is already installed, skipping");
        }

        let failures = match self.install(&absent) {
            Ok(failures) => failures,
            Err(e) => {
                self.transition(State::Failed);
                return Err(e);
            }
        };

        let outcomes = absent
            .iter()
            .map(|name| self.outcome(name, ChangeKind::New, None, &failures))
            .collect();
        let report = ApplyReport {
            operation: Operation::Add,
            outcomes,
            skipped: present,
        };
        self.finish(report)
    }

    /// Fetch (unless `offline`) and plan an update of `names`, or of every
    /// registered module. Named modules bring their dependencies along.
    pub fn plan_update(&mut self, names: Option<&[String]>, offline: bool) -> Result<Plan> {
        self.transition(State::Expanding);
        let selected = match self.select(names) {
            Ok(selected) => selected,
            Err(e) => {
                self.transition(State::Idle);
                return Err(e);
            }
        };

        self.transition(State::Planning);
        let fetch_errors = if offline {
            Failures::new()
        } else {
            let present: Vec<String> = selected
                .iter()
                .filter(|name| self.git.is_module(&self.registry.path_for(name)))
                .cloned()
                .collect();
            self.fetch(&present)
        };

        let modules: Vec<&Module> = selected
            .iter()
            .filter_map(|name| self.registry.get(name))
            .collect();
        let plan = plan::plan_updates(modules, &self.git, &fetch_errors);

        self.transition(State::AwaitingConfirm);
        Ok(plan)
    }

    /// Plan removal of directories in `opt` that no registered module claims.
    pub fn plan_clean(&mut self) -> Result<Plan> {
        self.transition(State::Expanding);
        let declared: HashSet<String> = self.registry.names().map(str::to_string).collect();

        self.transition(State::Planning);
        let plan = match plan::plan_clean(&declared, self.registry.opt_dir(), &self.git) {
            Ok(plan) => plan,
            Err(e) => {
                self.transition(State::Idle);
                return Err(e);
            }
        };

        self.transition(State::AwaitingConfirm);
        Ok(plan)
    }

    /// Discard a plan without side effects.
    pub fn cancel(&mut self, plan: Plan) {
        log::debug!("Discarding {} plan with {} entries", plan.kind, plan.entries.len());
        self.transition(State::Idle);
    }

    /// Apply the selected actionable entries of `plan`.
    ///
    /// `new` entries are installed, `update` entries checked out and `delete`
    /// entries removed. Per-module failures are reported, not raised; use
    /// [`ApplyReport::check`] to turn them into `PartiallyApplied`.
    pub fn apply(&mut self, plan: Plan, selection: &Selection) -> Result<ApplyReport> {
        self.transition(State::Applying);

        let (selected, skipped): (Vec<_>, Vec<_>) = plan
            .entries
            .iter()
            .partition(|e| e.kind.is_actionable() && selection.contains(&e.name));
        let skipped = skipped.into_iter().map(|e| e.name.clone()).collect();

        let installs: Vec<String> = selected
            .iter()
            .filter(|e| e.kind == ChangeKind::New)
            .map(|e| e.name.clone())
            .collect();
        let mut failures = match self.install(&installs) {
            Ok(failures) => failures,
            Err(e) => {
                self.transition(State::Failed);
                return Err(e);
            }
        };

        let mut targets = Vec::new();
        for entry in selected.iter().filter(|e| e.kind == ChangeKind::Update) {
            match &entry.target {
                Some(target) => targets.push((entry.name.clone(), target.clone())),
                None => {
                    failures.insert(entry.name.clone(), "no resolved target".to_string());
                }
            }
        }
        failures.extend(self.checkout(&targets, false));

        for entry in selected.iter().filter(|e| e.kind == ChangeKind::Delete) {
            if let Err(e) = self.remove(&entry.path) {
                failures.insert(entry.name.clone(), e.to_string());
            }
        }

        let outcomes = selected
            .iter()
            .map(|e| self.outcome(&e.name, e.kind, e.from.clone(), &failures))
            .collect();
        let report = ApplyReport {
            operation: match plan.kind {
                PlanKind::Update => Operation::Update,
                PlanKind::Clean => Operation::Clean,
            },
            outcomes,
            skipped,
        };
        self.finish(report)
    }

    /// Plan an update, let `confirm` review it, then apply.
    ///
    /// Returns `None` when the plan was declined.
    pub fn update(
        &mut self,
        names: Option<&[String]>,
        offline: bool,
        confirm: &mut dyn ConfirmCallback,
    ) -> Result<Option<ApplyReport>> {
        let plan = self.plan_update(names, offline)?;
        self.review(plan, confirm)
    }

    /// Plan a clean, let `confirm` review it, then apply.
    pub fn clean(&mut self, confirm: &mut dyn ConfirmCallback) -> Result<Option<ApplyReport>> {
        let plan = self.plan_clean()?;
        self.review(plan, confirm)
    }

    fn review(
        &mut self,
        plan: Plan,
        confirm: &mut dyn ConfirmCallback,
    ) -> Result<Option<ApplyReport>> {
        confirm.preview(&plan);
        if !plan.has_changes() {
            return self.apply(plan, &Selection::All).map(Some);
        }

        match confirm.confirm(&plan) {
            Ok(Some(selection)) => self.apply(plan, &selection).map(Some),
            Ok(None) => {
                self.cancel(plan);
                Ok(None)
            }
            Err(e) => {
                self.cancel(plan);
                Err(e)
            }
        }
    }

    /// Re-read every module's state from disk.
    pub fn refresh(&mut self) -> &Registry {
        self.registry.refresh_all(&self.git);
        &self.registry
    }

    /// Write a snapshot of present modules to `path` or the configured file.
    pub fn snapshot_save(&mut self, path: Option<&Path>) -> Result<(PathBuf, Snapshot)> {
        let path = path.map_or_else(|| self.config.snapshot_path.clone(), Path::to_path_buf);
        self.registry.refresh_all(&self.git);

        let snapshot = Snapshot::capture(self.registry.iter());
        snapshot.write(&path)?;
        log::debug!("Saved {} modules to {}", snapshot.len(), path.display());
        Ok((path, snapshot))
    }

    /// Force every registered, installed module to its recorded revision.
    ///
    /// Entries for modules outside the live set, or not on disk, are skipped.
    pub fn snapshot_load(&mut self, path: Option<&Path>) -> Result<ApplyReport> {
        let path = path.map_or_else(|| self.config.snapshot_path.clone(), Path::to_path_buf);
        let snapshot = Snapshot::read(&path)?;

        let mut revisions = Vec::new();
        for name in self.ordered_names() {
            if let Some(entry) = snapshot.get(&name)
                && self.git.is_module(&self.registry.path_for(&name))
            {
                revisions.push((name, entry.revision.clone()));
            }
        }
        let skipped = snapshot
            .entries
            .keys()
            .filter(|name| !revisions.iter().any(|(n, _)| n == *name))
            .cloned()
            .collect();

        self.restore(Operation::Snapshot, revisions, skipped)
    }

    /// Restore the `before` revisions of the most recent update.
    ///
    /// Returns `None` when the log holds no update.
    pub fn rollback(&mut self) -> Result<Option<ApplyReport>> {
        let Some(entry) = self.journal.last(Operation::Update)? else {
            return Ok(None);
        };

        let mut revisions = Vec::new();
        let mut skipped = Vec::new();
        for row in entry.rows {
            let restorable = row.is_ok()
                && row.kind == ChangeKind::Update
                && self.registry.contains(&row.name)
                && self.git.is_module(&self.registry.path_for(&row.name));
            match row.before {
                Some(before) if restorable => revisions.push((row.name, before)),
                _ => skipped.push(row.name),
            }
        }

        self.restore(Operation::Rollback, revisions, skipped).map(Some)
    }

    fn restore(
        &mut self,
        operation: Operation,
        revisions: Vec<(String, String)>,
        skipped: Vec<String>,
    ) -> Result<ApplyReport> {
        self.transition(State::Applying);

        let missing: Vec<String> = revisions
            .iter()
            .filter(|(name, revision)| {
                self.git
                    .resolve(&self.registry.path_for(name), revision)
                    .is_err()
            })
            .map(|(name, _)| name.clone())
            .collect();
        let mut failures = self.fetch(&missing);

        let mut targets = Vec::new();
        let mut befores = HashMap::new();
        for (name, revision) in &revisions {
            let path = self.registry.path_for(name);
            befores.insert(name.clone(), self.git.head(&path).ok());
            if failures.contains_key(name) {
                continue;
            }
            match self.git.resolve(&path, revision) {
                Ok(commit) => targets.push((
                    name.clone(),
                    Target::Revision {
                        revision: revision.clone(),
                        commit,
                    },
                )),
                Err(e) => {
                    failures.insert(name.clone(), e.to_string());
                }
            }
        }
        failures.extend(self.checkout(&targets, true));

        let outcomes = revisions
            .iter()
            .map(|(name, _)| {
                let before = befores.get(name).cloned().flatten();
                self.outcome(name, ChangeKind::Update, before, &failures)
            })
            .collect();
        let report = ApplyReport {
            operation,
            outcomes,
            skipped,
        };
        self.finish(report)
    }

    /// Log the report and settle the state machine.
    ///
    /// When the log cannot be written the report is kept for
    /// [`Orchestrator::take_unlogged`] and its outcomes go to the error log.
    fn finish(&mut self, report: ApplyReport) -> Result<ApplyReport> {
        if !report.outcomes.is_empty()
            && let Err(e) = self
                .journal
                .append(&JournalEntry::new(report.operation, report.rows()))
        {
            log::error!("{} was applied but not logged: {e}", report.operation);
            for outcome in &report.outcomes {
                log::error!(
                    "  {} {} {} -> {}",
                    outcome.name,
                    outcome.error.as_deref().unwrap_or("ok"),
                    outcome.before.as_deref().unwrap_or("-"),
                    outcome.after.as_deref().unwrap_or("-")
                );
            }
            self.unlogged = Some(report);
            self.transition(State::Failed);
            return Err(e);
        }

        log::debug!(
            "{} finished: {} applied, {} failed, {} skipped",
            report.operation,
            report.applied(),
            report.failed(),
            report.skipped.len()
        );
        self.transition(State::Done);
        Ok(report)
    }

    fn outcome(
        &mut self,
        name: &str,
        kind: ChangeKind,
        before: Option<String>,
        failures: &Failures,
    ) -> Outcome {
        let after = match self.registry.get_mut(name) {
            Some(module) => {
                module.refresh(&self.git);
                module.commit.clone()
            }
            None => None,
        };
        Outcome {
            name: name.to_string(),
            kind,
            before,
            after,
            error: failures.get(name).cloned(),
        }
    }

    /// Names to update: everything, or the named modules and their dependencies.
    fn select(&self, names: Option<&[String]>) -> Result<Vec<String>> {
        let Some(names) = names.filter(|n| !n.is_empty()) else {
            return Ok(self.ordered_names());
        };

        let mut specs = Vec::with_capacity(names.len());
        for name in names {
            let module = self
                .registry
                .get(name)
                .ok_or_else(|| Error::UnknownModule(name.clone()))?;
            specs.push(module.spec.clone());
        }

        Ok(expand_all(&specs)
            .into_iter()
            .map(|s| s.name)
            .filter(|name| self.registry.contains(name))
            .collect())
    }

    /// Every registered name, dependencies ahead of their dependents.
    ///
    /// A module re-declared with a new dependency keeps its earlier
    /// registration slot, so registration order alone is not enough.
    fn ordered_names(&self) -> Vec<String> {
        let specs: Vec<Spec> = self.registry.iter().map(|m| m.spec.clone()).collect();
        expand_all(&specs)
            .into_iter()
            .map(|s| s.name)
            .filter(|name| self.registry.contains(name))
            .collect()
    }

    fn hook(&self, module: &Module, event: HookEvent) -> Result<()> {
        let ctx = HookContext {
            path: module.path.clone(),
            source: module.spec.source.clone(),
            name: module.spec.name.clone(),
        };
        module.spec.hooks.invoke(event, &ctx)
    }

    fn fetch(&self, names: &[String]) -> Failures {
        let jobs = names
            .iter()
            .map(|name| self.git.fetch_job(name, &self.registry.path_for(name)))
            .collect();

        let mut failures = Failures::new();
        for result in self.runner.run_with(jobs, self.progress.as_ref()) {
            if let Some(e) = result.error() {
                log::warn!("{e}");
                failures.insert(result.job.module, e.to_string());
            }
        }
        failures
    }

    /// Clone absent modules, check out explicit targets, run install hooks.
    fn install(&self, names: &[String]) -> Result<Failures> {
        let mut failures = Failures::new();
        if names.is_empty() {
            return Ok(failures);
        }

        let opt_dir = self.registry.opt_dir();
        fs::create_dir_all(opt_dir).map_err(|e| Error::io(opt_dir, e))?;

        let mut jobs = Vec::new();
        for name in names {
            let Some(module) = self.registry.get(name) else {
                continue;
            };
            let Some(source) = module.spec.source.as_deref() else {
                failures.insert(name.clone(), format!("{name} has no source to install from"));
                continue;
            };
            if let Err(e) = self.hook(module, HookEvent::PreInstall) {
                failures.insert(name.clone(), e.to_string());
                continue;
            }
            jobs.push(self.git.clone_job(name, source, &module.path));
        }

        for result in self.runner.run_with(jobs, self.progress.as_ref()) {
            if let Some(e) = result.error() {
                // A killed clone can leave a partial directory that would
                // later pass for an installed module.
                let path = self.registry.path_for(&result.job.module);
                if path.exists()
                    && let Err(rm) = fs::remove_dir_all(&path)
                {
                    log::warn!("Cannot remove partial clone {}: {rm}", path.display());
                }
                failures.insert(result.job.module, e.to_string());
            }
        }

        let mut targets = Vec::new();
        for name in names {
            if failures.contains_key(name) {
                continue;
            }
            let Some(module) = self.registry.get(name) else {
                continue;
            };
            if module.spec.checkout.is_none() {
                continue;
            }
            match plan::resolve_target(&module.spec, &module.path, &self.git) {
                Ok(target) => targets.push((name.clone(), target)),
                Err(e) => {
                    failures.insert(name.clone(), e.to_string());
                }
            }
        }
        failures.extend(self.checkout(&targets, false));

        for name in names {
            if failures.contains_key(name) {
                continue;
            }
            if let Some(module) = self.registry.get(name)
                && let Err(e) = self.hook(module, HookEvent::PostInstall)
            {
                failures.insert(name.clone(), e.to_string());
            }
        }

        Ok(failures)
    }

    /// Check out targets with `pre_checkout`/`post_checkout` hooks around the batch.
    fn checkout(&self, targets: &[(String, Target)], force: bool) -> Failures {
        let mut failures = Failures::new();
        let mut jobs = Vec::new();

        for (name, target) in targets {
            let Some(module) = self.registry.get(name) else {
                continue;
            };
            if let Err(e) = self.hook(module, HookEvent::PreCheckout) {
                failures.insert(name.clone(), e.to_string());
                continue;
            }
            jobs.push(self.git.checkout_job(name, &module.path, target, force));
        }

        for result in self.runner.run_with(jobs, self.progress.as_ref()) {
            if let Some(e) = result.error() {
                failures.insert(result.job.module, e.to_string());
            }
        }

        for (name, _) in targets {
            if failures.contains_key(name) {
                continue;
            }
            if let Some(module) = self.registry.get(name)
                && let Err(e) = self.hook(module, HookEvent::PostCheckout)
            {
                failures.insert(name.clone(), e.to_string());
            }
        }
        failures
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if !path.starts_with(self.registry.opt_dir()) {
            return Err(Error::Config(format!(
                "refusing to remove {} outside {}",
                path.display(),
                self.registry.opt_dir().display()
            )));
        }
        log::debug!("Removing {}", path.display());
        fs::remove_dir_all(path).map_err(|e| Error::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AutoConfirm, AutoDecline};
    use crate::hooks::{FnHook, Hook};
    use crate::spec::SpecTable;
    use crate::testutil::{commit, git, init_repo};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Env {
        dir: tempfile::TempDir,
        engine: Orchestrator,
    }

    impl Env {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = EngineConfig::new(dir.path().join("pkg"));
            config.n_threads = 2;
            config.url_format = format!("file://{}/remote/%s", dir.path().display());
            let engine = Orchestrator::new(config).unwrap();
            Self { dir, engine }
        }

        fn remote(&self, repo: &str) -> PathBuf {
            self.dir.path().join("remote").join(repo)
        }

        /// Create `org/<name>` with one commit and return that commit.
        fn publish(&self, name: &str) -> String {
            let remote = init_repo(&self.remote(&format!("org/{name}")));
            commit(&remote, &format!("{name}: initial"))
        }

        fn head(&self, name: &str) -> String {
            self.engine
                .inspector()
                .head(&self.engine.registry().path_for(name))
                .unwrap()
        }
    }

    fn table(source: &str) -> SpecTable {
        SpecTable {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    fn counting_hook(count: &Arc<AtomicUsize>) -> impl Hook + 'static {
        let count = Arc::clone(count);
        FnHook::new(move |_: &HookContext| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::new("/tmp/pkg");
        config.n_threads = 0;
        assert!(matches!(Orchestrator::new(config), Err(Error::Config(_))));

        let mut config = EngineConfig::new("/tmp/pkg");
        config.git_cmd = " ".into();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::new("/tmp/pkg");
        config.timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_add_installs_dependencies_first() {
        let mut env = Env::new();
        let a = env.publish("pluginA");
        let b = env.publish("pluginB");

        let input = SpecInput::Table(SpecTable {
            depends: vec!["org/pluginB".into()],
            ..table("org/pluginA")
        });
        let report = env.engine.add(&[input]).unwrap();

        let names: Vec<_> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["pluginB", "pluginA"]);
        report.check().unwrap();
        assert_eq!(env.engine.state(), State::Done);
        assert_eq!(env.head("pluginA"), a);
        assert_eq!(env.head("pluginB"), b);
        assert!(env.engine.registry().get("pluginA").unwrap().is_present());

        // Second add is a no-op for present modules.
        let again = env.engine.add(&["org/pluginA".into()]).unwrap();
        assert!(again.outcomes.is_empty());
        assert_eq!(again.skipped, vec!["pluginA"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_add_with_checkout_and_hook() {
        let mut env = Env::new();
        let first = env.publish("pluginA");
        let remote = env.remote("org/pluginA");
        git(&remote, &["tag", "v1"]);
        commit(&remote, "pluginA: second");

        let input = SpecInput::Table(SpecTable {
            checkout: Some("v1".into()),
            hooks: BTreeMap::from([(HookEvent::PostInstall, "touch installed".to_string())]),
            ..table("org/pluginA")
        });
        env.engine.add(&[input]).unwrap().check().unwrap();

        assert_eq!(env.head("pluginA"), first);
        assert!(env.engine.registry().path_for("pluginA").join("installed").exists());
    }

    #[test]
    fn test_add_isolates_failed_clone() {
        let mut env = Env::new();
        env.publish("pluginA");

        let report = env
            .engine
            .add(&["org/pluginA".into(), "org/missing".into()])
            .unwrap();

        assert_eq!(report.applied(), 1);
        let failed: Vec<_> = report.failures().map(|o| o.name.as_str()).collect();
        assert_eq!(failed, vec!["missing"]);
        assert!(matches!(
            report.check(),
            Err(Error::PartiallyApplied { applied: 1, failed: 1, .. })
        ));
        assert!(!env.engine.registry().path_for("missing").exists());
    }

    #[test]
    fn test_add_isolates_failed_install_hook() {
        let mut env = Env::new();
        env.publish("pluginA");
        env.publish("pluginB");
        let inputs: Vec<SpecInput> = vec!["org/pluginA".into(), "org/pluginB".into()];
        env.engine.declare(&inputs).unwrap();

        let failing = Hooks::new().with(
            HookEvent::PostInstall,
            FnHook::new(|ctx: &HookContext| {
                Err(Error::HookFailed {
                    name: ctx.name.clone(),
                    event: HookEvent::PostInstall.to_string(),
                    message: "build step failed".into(),
                })
            }),
        );
        env.engine.set_hooks("pluginA", &failing).unwrap();

        let report = env.engine.add(&inputs).unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.applied(), 1);
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed[0].name, "pluginA");
        assert!(
            failed[0]
                .error
                .as_deref()
                .unwrap()
                .contains("build step failed")
        );
        assert!(env.engine.registry().get("pluginB").unwrap().is_present());
        assert_eq!(env.engine.state(), State::Done);
    }

    #[test]
    fn test_set_hooks_requires_registered_module() {
        let mut env = Env::new();
        let err = env.engine.set_hooks("ghost", &Hooks::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownModule(name) if name == "ghost"));
    }

    #[test]
    fn test_spec_errors_fail_before_any_job() {
        let mut env = Env::new();
        let err = env.engine.add(&["not-installed".into()]).unwrap_err();

        assert!(matches!(err, Error::InvalidSpec { .. }));
        assert!(err.is_fatal());
        assert_eq!(env.engine.state(), State::Idle);
        assert!(env.engine.registry().is_empty());
        assert!(!env.engine.registry().opt_dir().exists());
    }

    #[test]
    fn test_update_applies_and_logs_then_rolls_back() {
        let mut env = Env::new();
        let abc = env.publish("pluginA");
        env.engine.add(&["org/pluginA".into()]).unwrap();
        let def = commit(&env.remote("org/pluginA"), "pluginA: fix");

        let plan = env.engine.plan_update(None, false).unwrap();
        assert_eq!(env.engine.state(), State::AwaitingConfirm);
        let entry = plan.get("pluginA").unwrap();
        assert_eq!(entry.kind, ChangeKind::Update);
        assert_eq!(entry.from.as_deref(), Some(abc.as_str()));
        assert_eq!(entry.to.as_deref(), Some(def.as_str()));
        assert_eq!(entry.commits.len(), 1);
        assert_eq!(entry.commits[0].subject, "pluginA: fix");

        let report = env.engine.apply(plan, &Selection::All).unwrap();
        report.check().unwrap();
        assert_eq!(env.head("pluginA"), def);

        let logged = env.engine.journal().last(Operation::Update).unwrap().unwrap();
        assert_eq!(logged.rows.len(), 1);
        assert_eq!(logged.rows[0].before.as_deref(), Some(abc.as_str()));
        assert_eq!(logged.rows[0].after.as_deref(), Some(def.as_str()));

        let rolled = env.engine.rollback().unwrap().unwrap();
        rolled.check().unwrap();
        assert_eq!(env.head("pluginA"), abc);
        assert!(env.engine.journal().last(Operation::Rollback).unwrap().is_some());
    }

    #[test]
    fn test_update_runs_checkout_hooks() {
        let mut env = Env::new();
        env.publish("pluginA");
        env.engine.add(&["org/pluginA".into()]).unwrap();

        let pre = Arc::new(AtomicUsize::new(0));
        let post = Arc::new(AtomicUsize::new(0));
        let hooks = Hooks::new()
            .with(HookEvent::PreCheckout, counting_hook(&pre))
            .with(HookEvent::PostCheckout, counting_hook(&post));
        env.engine.set_hooks("pluginA", &hooks).unwrap();
        let def = commit(&env.remote("org/pluginA"), "pluginA: fix");

        let plan = env.engine.plan_update(None, false).unwrap();
        assert_eq!(pre.load(Ordering::SeqCst), 0);
        env.engine
            .apply(plan, &Selection::All)
            .unwrap()
            .check()
            .unwrap();

        assert_eq!(env.head("pluginA"), def);
        assert_eq!(pre.load(Ordering::SeqCst), 1);
        assert_eq!(post.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unwritable_log_keeps_report() {
        let mut env = Env::new();
        let abc = env.publish("pluginA");
        // A directory where the log file should be makes every append fail.
        fs::create_dir_all(&env.engine.config().log_path).unwrap();

        let err = env.engine.add(&["org/pluginA".into()]).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(env.engine.state(), State::Failed);
        assert_eq!(env.head("pluginA"), abc);

        let report = env.engine.take_unlogged().unwrap();
        assert_eq!(report.applied(), 1);
        assert_eq!(report.outcomes[0].name, "pluginA");
        assert_eq!(report.outcomes[0].after.as_deref(), Some(abc.as_str()));
        assert!(env.engine.take_unlogged().is_none());
    }

    #[test]
    fn test_offline_plan_skips_fetch() {
        let mut env = Env::new();
        env.publish("pluginA");
        env.engine.add(&["org/pluginA".into()]).unwrap();
        commit(&env.remote("org/pluginA"), "pluginA: unseen");

        let plan = env.engine.plan_update(None, true).unwrap();
        assert_eq!(plan.get("pluginA").unwrap().kind, ChangeKind::Same);
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_declined_update_has_no_side_effects() {
        let mut env = Env::new();
        let abc = env.publish("pluginA");
        env.engine.add(&["org/pluginA".into()]).unwrap();
        commit(&env.remote("org/pluginA"), "pluginA: later");

        let result = env.engine.update(None, false, &mut AutoDecline).unwrap();
        assert!(result.is_none());
        assert_eq!(env.engine.state(), State::Idle);
        assert_eq!(env.head("pluginA"), abc);
        assert!(env.engine.journal().last(Operation::Update).unwrap().is_none());
    }

    #[derive(Default)]
    struct Recording {
        previews: usize,
        confirms: usize,
    }

    impl ConfirmCallback for Recording {
        fn preview(&mut self, _plan: &Plan) {
            self.previews += 1;
        }

        fn confirm(&mut self, _plan: &Plan) -> Result<Option<Selection>> {
            self.confirms += 1;
            Ok(Some(Selection::All))
        }
    }

    #[test]
    fn test_up_to_date_plan_is_previewed_but_not_confirmed() {
        let mut env = Env::new();
        env.publish("pluginA");
        env.engine.add(&["org/pluginA".into()]).unwrap();

        let mut recording = Recording::default();
        let report = env.engine.update(None, false, &mut recording).unwrap().unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!((recording.previews, recording.confirms), (1, 0));

        commit(&env.remote("org/pluginA"), "pluginA: next");
        env.engine.update(None, false, &mut recording).unwrap();
        assert_eq!((recording.previews, recording.confirms), (2, 1));
    }

    #[test]
    fn test_unselected_entries_are_skipped() {
        let mut env = Env::new();
        let a = env.publish("pluginA");
        env.publish("pluginB");
        env.engine
            .add(&["org/pluginA".into(), "org/pluginB".into()])
            .unwrap();
        commit(&env.remote("org/pluginA"), "pluginA: next");
        let b_next = commit(&env.remote("org/pluginB"), "pluginB: next");

        let plan = env.engine.plan_update(None, false).unwrap();
        let report = env
            .engine
            .apply(plan, &Selection::only(["pluginB"]))
            .unwrap();

        assert_eq!(report.skipped, vec!["pluginA"]);
        assert_eq!(env.head("pluginA"), a);
        assert_eq!(env.head("pluginB"), b_next);
    }

    #[test]
    fn test_redeclared_dependency_is_planned_first() {
        let mut env = Env::new();
        env.engine.declare(&["org/a".into()]).unwrap();
        let redeclared = SpecInput::Table(SpecTable {
            depends: vec!["org/b".into()],
            ..table("org/a")
        });
        env.engine.declare(&[redeclared]).unwrap();

        let names: Vec<_> = env.engine.registry().names().collect();
        assert_eq!(names, vec!["a", "b"]);

        let plan = env.engine.plan_update(None, true).unwrap();
        let planned: Vec<_> = plan.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(planned, vec!["b", "a"]);
    }

    #[test]
    fn test_unknown_module_in_update() {
        let mut env = Env::new();
        let err = env
            .engine
            .plan_update(Some(&["ghost".to_string()]), true)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModule(name) if name == "ghost"));
    }

    #[test]
    fn test_clean_removes_undeclared_directories() {
        let mut env = Env::new();
        env.publish("pluginA");
        env.engine.add(&["org/pluginA".into()]).unwrap();
        let stale = env.engine.registry().path_for("stale");
        init_repo(&stale);

        assert!(env.engine.clean(&mut AutoDecline).unwrap().is_none());
        assert!(stale.exists());

        let report = env.engine.clean(&mut AutoConfirm).unwrap().unwrap();
        report.check().unwrap();
        assert_eq!(report.outcomes[0].kind, ChangeKind::Delete);
        assert!(!stale.exists());
        assert!(env.engine.registry().path_for("pluginA").exists());
    }

    #[test]
    fn test_snapshot_round_trip_restores_revisions() {
        let mut env = Env::new();
        let first = env.publish("pluginA");
        env.publish("pluginB");
        env.engine
            .add(&["org/pluginA".into(), "org/pluginB".into()])
            .unwrap();

        let (path, snapshot) = env.engine.snapshot_save(None).unwrap();
        assert_eq!(snapshot.len(), 2);

        // A recorded module outside the live set is ignored.
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str(&format!("ghost\t-\t{first}\t-\n"));
        fs::write(&path, text).unwrap();

        commit(&env.remote("org/pluginA"), "pluginA: moved");
        env.engine
            .update(None, false, &mut AutoConfirm)
            .unwrap()
            .unwrap()
            .check()
            .unwrap();
        assert_ne!(env.head("pluginA"), first);

        let report = env.engine.snapshot_load(None).unwrap();
        report.check().unwrap();
        assert_eq!(env.head("pluginA"), first);
        assert_eq!(report.skipped, vec!["ghost"]);
        assert!(env.engine.journal().last(Operation::Snapshot).unwrap().is_some());
    }

    #[test]
    fn test_rollback_without_history() {
        let mut env = Env::new();
        assert!(env.engine.rollback().unwrap().is_none());
    }
}
