//! The session's module records.
//!
//! A [`Registry`] is an owned value: the orchestrator holds one and every
//! mutation goes through it. Records are created on first registration,
//! refreshed from disk, and never dropped implicitly.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::inspect::Inspector;
use crate::spec::Spec;

/// On-disk state of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "message")]
pub enum InstallStatus {
    Absent,
    Present,
    Error(String),
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Present => f.write_str("present"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// A registered module.
#[derive(Debug, Clone)]
pub struct Module {
    pub spec: Spec,
    /// `<package>/opt/<name>`
    pub path: PathBuf,
    pub status: InstallStatus,
    /// Last observed checked-out commit
    pub commit: Option<String>,
}

impl Module {
    pub fn new(spec: Spec, path: PathBuf) -> Self {
        Self {
            spec,
            path,
            status: InstallStatus::Absent,
            commit: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_present(&self) -> bool {
        self.status == InstallStatus::Present
    }

    /// Re-read status and commit from disk.
    pub fn refresh(&mut self, inspector: &dyn Inspector) {
        if inspector.is_module(&self.path) {
            match inspector.head(&self.path) {
                Ok(head) => {
                    self.status = InstallStatus::Present;
                    self.commit = Some(head);
                }
                Err(e) => {
                    self.status = InstallStatus::Error(e.to_string());
                    self.commit = None;
                }
            }
        } else if self.path.exists() {
            self.status = InstallStatus::Error(format!(
                "{} exists but is not a repository",
                self.path.display()
            ));
            self.commit = None;
        } else {
            self.status = InstallStatus::Absent;
            self.commit = None;
        }
    }
}

/// Modules keyed by name, in registration order.
#[derive(Debug, Clone)]
pub struct Registry {
    opt_dir: PathBuf,
    modules: Vec<Module>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Registry whose modules live under `<package_dir>/opt`.
    pub fn new(package_dir: impl AsRef<Path>) -> Self {
        Self {
            opt_dir: package_dir.as_ref().join("opt"),
            modules: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn opt_dir(&self) -> &Path {
        &self.opt_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.opt_dir.join(name)
    }

    /// Register a spec, merging into an existing record of the same name.
    pub fn register(&mut self, spec: Spec) -> &mut Module {
        let slot = match self.index.get(&spec.name) {
            Some(&slot) => {
                self.modules[slot].spec.merge(&spec);
                slot
            }
            None => {
                let slot = self.modules.len();
                let path = self.path_for(&spec.name);
                self.index.insert(spec.name.clone(), slot);
                self.modules.push(Module::new(spec, path));
                slot
            }
        };
        &mut self.modules[slot]
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.index.get(name).map(|&slot| &self.modules[slot])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.index.get(name).map(|&slot| &mut self.modules[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(Module::name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Refresh every record from disk.
    pub fn refresh_all(&mut self, inspector: &dyn Inspector) {
        for module in &mut self.modules {
            module.refresh(inspector);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::Git;
    use crate::testutil::{commit, init_repo};

    #[test]
    fn test_register_merges_by_name() {
        let mut registry = Registry::new("/pkg");
        registry.register(Spec::new("a").with_source("https://example.com/a"));
        registry.register(Spec::new("b"));
        registry.register(Spec::new("a").with_checkout("v2"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);

        let a = registry.get("a").unwrap();
        assert_eq!(a.spec.checkout.as_deref(), Some("v2"));
        assert_eq!(a.spec.source.as_deref(), Some("https://example.com/a"));
        assert_eq!(a.path, PathBuf::from("/pkg/opt/a"));
        assert_eq!(a.status, InstallStatus::Absent);
    }

    #[test]
    fn test_refresh_reads_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::new(dir.path());
        registry.register(Spec::new("repo"));
        registry.register(Spec::new("plain"));
        registry.register(Spec::new("missing"));

        let head = commit(&init_repo(&registry.path_for("repo")), "init");
        std::fs::create_dir_all(registry.path_for("plain")).unwrap();

        registry.refresh_all(&Git::default());

        let repo = registry.get("repo").unwrap();
        assert!(repo.is_present());
        assert_eq!(repo.commit.as_deref(), Some(head.as_str()));
        assert!(matches!(
            registry.get("plain").unwrap().status,
            InstallStatus::Error(_)
        ));
        assert_eq!(
            registry.get("missing").unwrap().status,
            InstallStatus::Absent
        );
    }
}
