//! Read-only repository queries.
//!
//! The planner and orchestrator only see repositories through [`Inspector`],
//! so classification can be tested against an in-memory fake.

use std::path::Path;

use serde::Serialize;

use crate::error::Result;

/// One line of a commit range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    /// Abbreviated hash
    pub hash: String,
    pub subject: String,
}

impl CommitSummary {
    pub fn new(hash: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            subject: subject.into(),
        }
    }
}

/// Queries against an on-disk module. Implementations never mutate.
///
/// Methods fail with `NotAModule` when `path` is not a repository and with
/// `RevisionNotFound` when an identifier does not resolve.
pub trait Inspector: Send + Sync {
    /// Whether `path` is a repository.
    fn is_module(&self, path: &Path) -> bool;

    /// Full hash of the checked-out commit.
    fn head(&self, path: &Path) -> Result<String>;

    /// URL of the `origin` remote, if configured.
    fn remote_url(&self, path: &Path) -> Result<Option<String>>;

    /// Branch names known on `origin`, without the remote prefix.
    fn remote_branches(&self, path: &Path) -> Result<Vec<String>>;

    /// Default branch of `origin`.
    fn default_branch(&self, path: &Path) -> Result<String>;

    /// Resolve a revision (branch, tag, commit, `origin/x`) to a full hash.
    fn resolve(&self, path: &Path, revision: &str) -> Result<String>;

    /// Commits reachable from `to` but not from `from`, newest first.
    fn log(&self, path: &Path, from: &str, to: &str) -> Result<Vec<CommitSummary>>;
}
