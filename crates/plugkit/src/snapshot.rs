//! Snapshot text format.
//!
//! ```text
//! # plugsync snapshot
//! # name<TAB>source<TAB>revision<TAB>monitor
//! plenary.nvim	https://github.com/nvim-lua/plenary.nvim	4b7e52044bbb84242158d977a50c4cbcd85070c7	-
//! ```
//!
//! One line per module, sorted by name, `-` for absent values. Blank lines and
//! lines starting with `#` are ignored on load.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::registry::Module;

const HEADER: &str = "# plugsync snapshot\n# name\tsource\trevision\tmonitor\n";
const ABSENT: &str = "-";
const FIELDS: usize = 4;

/// Recorded state of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub source: Option<String>,
    /// Full commit hash
    pub revision: String,
    pub monitor: Option<String>,
}

/// Name to recorded state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub entries: BTreeMap<String, SnapshotEntry>,
}

impl Snapshot {
    /// Snapshot of every present module with a known commit.
    pub fn capture<'a, I>(modules: I) -> Self
    where
        I: IntoIterator<Item = &'a Module>,
    {
        let entries = modules
            .into_iter()
            .filter(|m| m.is_present())
            .filter_map(|m| {
                let revision = m.commit.clone()?;
                Some((
                    m.name().to_string(),
                    SnapshotEntry {
                        source: m.spec.source.clone(),
                        revision,
                        monitor: m.spec.monitor.clone(),
                    },
                ))
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&SnapshotEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read and parse a snapshot file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        load(&text)
    }

    /// Serialize to a file, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(path, save(self)).map_err(|e| Error::io(path, e))
    }
}

/// Serialize a snapshot.
pub fn save(snapshot: &Snapshot) -> String {
    let mut out = String::from(HEADER);
    for (name, entry) in &snapshot.entries {
        let fields = [
            name.as_str(),
            entry.source.as_deref().unwrap_or(ABSENT),
            entry.revision.as_str(),
            entry.monitor.as_deref().unwrap_or(ABSENT),
        ];
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}

/// Parse snapshot text.
pub fn load(text: &str) -> Result<Snapshot> {
    let mut entries = BTreeMap::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let malformed = |reason: String| Error::MalformedSnapshot {
            line: line_no,
            reason,
        };

        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() != FIELDS {
            return Err(malformed(format!(
                "expected {FIELDS} tab-separated fields, found {}",
                fields.len()
            )));
        }

        let name = fields[0];
        if name.is_empty() || name == ABSENT {
            return Err(malformed("empty name".into()));
        }

        let revision = fields[2];
        if !is_commit_hash(revision) {
            return Err(malformed(format!("'{revision}' is not a commit hash")));
        }

        let entry = SnapshotEntry {
            source: optional(fields[1]),
            revision: revision.to_string(),
            monitor: optional(fields[3]),
        };
        if entries.insert(name.to_string(), entry).is_some() {
            return Err(malformed(format!("duplicate entry for {name}")));
        }
    }

    Ok(Snapshot { entries })
}

fn optional(field: &str) -> Option<String> {
    (!field.is_empty() && field != ABSENT).then(|| field.to_string())
}

fn is_commit_hash(s: &str) -> bool {
    (4..=64).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}
