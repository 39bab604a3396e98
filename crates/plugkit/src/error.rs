//! Error types for plugin synchronization.
//!
//! Errors are split into two groups. Specification and configuration errors
//! are fatal to a whole operation and are raised before any job is scheduled.
//! Everything else is scoped to a single module and is collected into reports
//! instead of aborting the batch.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::job::Phase;

/// Result type alias for plugkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synchronizing plugins.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unresolvable specification
    #[error("invalid spec '{input}': {reason}")]
    InvalidSpec {
        /// The offending input as written by the user
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Path is not a recognized repository
    #[error("not a module repository: {}", path.display())]
    NotAModule {
        /// Path that was inspected
        path: PathBuf,
    },

    /// A revision identifier did not resolve
    #[error("revision '{revision}' not found in {}", path.display())]
    RevisionNotFound {
        /// Repository path
        path: PathBuf,
        /// Requested revision
        revision: String,
    },

    /// A subprocess job exited unsuccessfully
    #[error("{phase} failed for {name}: {message}")]
    JobFailed {
        /// Module the job belonged to
        name: String,
        /// Phase of the job
        phase: Phase,
        /// Exit code, if the process exited normally
        status: Option<i32>,
        /// Captured stderr or spawn error
        message: String,
    },

    /// A subprocess job exceeded its deadline
    #[error("{phase} timed out for {name} after {}ms", timeout.as_millis())]
    JobTimedOut {
        /// Module the job belonged to
        name: String,
        /// Phase of the job
        phase: Phase,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// A lifecycle hook reported failure
    #[error("{event} hook failed for {name}: {message}")]
    HookFailed {
        /// Module the hook belongs to
        name: String,
        /// Hook event name
        event: String,
        /// Failure description
        message: String,
    },

    /// Snapshot text could not be parsed
    #[error("malformed snapshot at line {line}: {reason}")]
    MalformedSnapshot {
        /// 1-based line number
        line: usize,
        /// What was wrong with the line
        reason: String,
    },

    /// Some entries of an apply pass failed
    #[error("partially applied: {applied} succeeded, {failed} failed ({})", names.join(", "))]
    PartiallyApplied {
        /// Entries applied successfully
        applied: usize,
        /// Entries that failed
        failed: usize,
        /// Names of the failed modules
        names: Vec<String>,
    },

    /// A module name is not registered
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// Invalid engine configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error during file operations
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Path involved in the error
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Worker pool could not be created
    #[error("failed to create job pool: {0}")]
    ThreadPool(String),

    /// The front end could not obtain a confirmation
    #[error("confirmation failed: {0}")]
    Confirm(String),
}

impl Error {
    /// Build an [`Error::InvalidSpec`].
    pub fn invalid_spec(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Build an [`Error::Io`] for a path.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborts a whole operation rather than one module.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidSpec { .. }
                | Self::Config(_)
                | Self::ThreadPool(_)
                | Self::UnknownModule(_)
                | Self::Confirm(_)
        )
    }
}
