//! Append-only update log.
//!
//! Each apply pass appends one entry: a header line with a UTC timestamp and
//! the operation, followed by one row per touched module.
//!
//! ```text
//! == 2026-03-01T10:15:00+00:00 update
//! update	telescope.nvim	3f1c2a9e...	8d04b7c1...	ok
//! new	plenary.nvim	-	0a1b2c3d...	ok
//! update	lualine.nvim	1234abcd...	5678def0...	failed: checkout timed out for lualine.nvim after 30000ms
//! ```
//!
//! Rollback reads the most recent `update` entry back.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::plan::ChangeKind;

const HEADER_PREFIX: &str = "== ";
const ABSENT: &str = "-";

/// Operation recorded by an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    Update,
    Clean,
    Snapshot,
    Rollback,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Clean => "clean",
            Self::Snapshot => "snapshot",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        [
            Self::Add,
            Self::Update,
            Self::Clean,
            Self::Snapshot,
            Self::Rollback,
        ]
        .into_iter()
        .find(|op| op.as_str() == s)
        .ok_or_else(|| format!("unknown operation '{s}'"))
    }
}

/// Outcome of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStatus {
    Ok,
    Failed(String),
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// One module's line in an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRow {
    pub kind: ChangeKind,
    pub name: String,
    /// Commit before the operation
    pub before: Option<String>,
    /// Commit after the operation
    pub after: Option<String>,
    pub status: RowStatus,
}

impl JournalRow {
    pub fn is_ok(&self) -> bool {
        self.status == RowStatus::Ok
    }

    fn render(&self) -> String {
        // Messages are flattened so a row stays on one line.
        let status = self.status.to_string();
        let status = status.split_whitespace().collect::<Vec<_>>().join(" ");
        [
            self.kind.as_str(),
            self.name.as_str(),
            self.before.as_deref().unwrap_or(ABSENT),
            self.after.as_deref().unwrap_or(ABSENT),
            status.as_str(),
        ]
        .join("\t")
    }

    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(5, '\t');
        let kind = fields.next()?.parse().ok()?;
        let name = fields.next()?.to_string();
        let before = optional(fields.next()?);
        let after = optional(fields.next()?);
        let status = match fields.next()? {
            "ok" => RowStatus::Ok,
            other => RowStatus::Failed(
                other
                    .strip_prefix("failed: ")
                    .unwrap_or(other)
                    .to_string(),
            ),
        };
        Some(Self {
            kind,
            name,
            before,
            after,
            status,
        })
    }
}

/// One apply pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub rows: Vec<JournalRow>,
}

impl JournalEntry {
    pub fn new(operation: Operation, rows: Vec<JournalRow>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            rows,
        }
    }

    fn render(&self) -> String {
        let mut out = format!(
            "{HEADER_PREFIX}{} {}\n",
            self.timestamp.to_rfc3339(),
            self.operation
        );
        for row in &self.rows {
            out.push_str(&row.render());
            out.push('\n');
        }
        out
    }
}

/// The update log file. Appends are serialized through an internal lock.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;
        file.write_all(entry.render().as_bytes())
            .map_err(|e| Error::io(&self.path, e))?;

        log::debug!(
            "Logged {} entry with {} rows to {}",
            entry.operation,
            entry.rows.len(),
            self.path.display()
        );
        Ok(())
    }

    /// All entries, oldest first. A missing file is an empty log.
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        Ok(parse(&text))
    }

    /// Most recent entry for `operation`.
    pub fn last(&self, operation: Operation) -> Result<Option<JournalEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .find(|e| e.operation == operation))
    }
}

fn parse(text: &str) -> Vec<JournalEntry> {
    let mut entries: Vec<JournalEntry> = Vec::new();
    let mut skipping = true;

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix(HEADER_PREFIX) {
            match parse_header(header) {
                Some((timestamp, operation)) => {
                    entries.push(JournalEntry {
                        timestamp,
                        operation,
                        rows: Vec::new(),
                    });
                    skipping = false;
                }
                None => {
                    log::warn!("Ignoring unreadable log header at line {}", index + 1);
                    skipping = true;
                }
            }
            continue;
        }

        if skipping {
            continue;
        }
        match (JournalRow::parse(line), entries.last_mut()) {
            (Some(row), Some(entry)) => entry.rows.push(row),
            _ => log::warn!("Ignoring unreadable log row at line {}", index + 1),
        }
    }
    entries
}

fn parse_header(header: &str) -> Option<(DateTime<Utc>, Operation)> {
    let (stamp, op) = header.trim().split_once(' ')?;
    let timestamp = DateTime::parse_from_rfc3339(stamp).ok()?.with_timezone(&Utc);
    let operation = op.trim().parse().ok()?;
    Some((timestamp, operation))
}

fn optional(field: &str) -> Option<String> {
    (!field.is_empty() && field != ABSENT).then(|| field.to_string())
}
