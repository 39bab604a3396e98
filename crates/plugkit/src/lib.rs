//! # Plugkit
//!
//! Synchronization engine for plugins fetched and versioned with git.
//!
//! Users declare plugins and their transitive dependencies. The engine keeps
//! each one checked out under `<package>/opt/<name>`, plans updates into a
//! reviewable change set, applies the confirmed part of it, snapshots and
//! restores exact revisions, and removes modules that are no longer declared.
//!
//! ## Core Concepts
//!
//! - **Spec**: canonical plugin declaration, normalized from a string or table
//! - **Registry**: the session's module records, owned by the orchestrator
//! - **JobRunner**: bounded pool running git subprocesses with per-job timeouts
//! - **Plan**: pure change set computed by the planner; applied with a
//!   [`Selection`]
//! - **Orchestrator**: add / update / clean / snapshot / rollback workflows
//!
//! ## Example
//!
//! ```ignore
//! use plugkit::{AutoConfirm, EngineConfig, Orchestrator, SpecInput};
//!
//! let mut engine = Orchestrator::new(EngineConfig::new("/home/me/.local/share/plugsync"))?;
//! engine.add(&[SpecInput::from("nvim-lua/plenary.nvim")])?.check()?;
//!
//! let plan = engine.plan_update(None, false)?;
//! for entry in plan.actionable() {
//!     println!("{} {}", entry.kind, entry.name);
//! }
//! engine.apply(plan, &plugkit::Selection::All)?.check()?;
//! ```

pub mod context;
pub mod error;
pub mod expand;
pub mod git;
pub mod hooks;
pub mod inspect;
pub mod job;
pub mod journal;
pub mod orchestrator;
pub mod plan;
pub mod registry;
pub mod snapshot;
pub mod spec;

#[cfg(test)]
mod testutil;

pub use context::{AutoConfirm, AutoDecline, ConfirmCallback};
pub use error::{Error, Result};
pub use expand::{expand, expand_all};
pub use git::Git;
pub use hooks::{FnHook, Hook, HookContext, HookEvent, Hooks, NoHook, ShellHook};
pub use inspect::{CommitSummary, Inspector};
pub use job::{Job, JobResult, JobRunner, NoProgress, Phase, Progress};
pub use journal::{Journal, JournalEntry, JournalRow, Operation, RowStatus};
pub use orchestrator::{ApplyReport, EngineConfig, Orchestrator, Outcome, State};
pub use plan::{ChangeEntry, ChangeKind, Plan, PlanKind, PlanSummary, Selection, Target};
pub use registry::{InstallStatus, Module, Registry};
pub use snapshot::{Snapshot, SnapshotEntry};
pub use spec::{Normalizer, Spec, SpecInput, SpecTable};
