//! The git backend.
//!
//! Mutating operations (clone, fetch, checkout) are returned as [`Job`]s for
//! the [`JobRunner`](crate::job::JobRunner). Read-only queries implement
//! [`Inspector`] by running git synchronously.

use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::inspect::{CommitSummary, Inspector};
use crate::job::{DEFAULT_TIMEOUT, Job, Phase};
use crate::plan::Target;

/// Git command wrapper.
#[derive(Debug, Clone)]
pub struct Git {
    program: String,
    timeout: Duration,
}

impl Default for Git {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Git {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Deadline applied to every job this backend builds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn job(&self, module: &str, phase: Phase, cwd: &Path) -> Job {
        Job::new(module, phase, &self.program, cwd)
            .timeout(self.timeout)
            .env("GIT_TERMINAL_PROMPT", "0")
    }

    /// Clone `source` into `dest`. Runs in the parent of `dest`.
    pub fn clone_job(&self, module: &str, source: &str, dest: &Path) -> Job {
        let cwd = dest.parent().unwrap_or(dest);
        self.job(module, Phase::Clone, cwd).args([
            "clone",
            "--quiet",
            "--",
            source,
            &*dest.to_string_lossy(),
        ])
    }

    /// Fetch branches and tags from `origin`.
    pub fn fetch_job(&self, module: &str, path: &Path) -> Job {
        self.job(module, Phase::Fetch, path).args([
            "fetch", "--quiet", "--prune", "--tags", "--force", "origin",
        ])
    }

    /// Move the working tree to `target`.
    ///
    /// Branch targets reset the local branch of the same name onto the
    /// resolved commit; revision targets detach. `force` discards local edits.
    pub fn checkout_job(&self, module: &str, path: &Path, target: &Target, force: bool) -> Job {
        let mut job = self.job(module, Phase::Checkout, path).args(["checkout", "-q"]);
        if force {
            job = job.arg("--force");
        }
        match target {
            Target::Branch { name, commit } => job.args(["-B", name.as_str(), commit.as_str()]),
            Target::Revision { commit, .. } => job.args(["--detach", commit.as_str()]),
        }
    }

    fn output(&self, path: &Path, args: &[&str]) -> Result<Output> {
        Command::new(&self.program)
            .args(args)
            .current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::io(path, e))
    }

    /// Run a query; `Ok(None)` when git exits non-zero.
    fn query(&self, path: &Path, args: &[&str]) -> Result<Option<String>> {
        let output = self.output(path, args)?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            log::trace!(
                "git {} in {} failed: {}",
                args.join(" "),
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            Ok(None)
        }
    }

    fn ensure_module(&self, path: &Path) -> Result<()> {
        if self.is_module(path) {
            Ok(())
        } else {
            Err(Error::NotAModule {
                path: path.to_path_buf(),
            })
        }
    }
}

impl Inspector for Git {
    fn is_module(&self, path: &Path) -> bool {
        // A plain directory nested inside some other checkout must not count.
        path.join(".git").exists()
            && matches!(self.query(path, &["rev-parse", "--git-dir"]), Ok(Some(_)))
    }

    fn head(&self, path: &Path) -> Result<String> {
        self.ensure_module(path)?;
        self.query(path, &["rev-parse", "HEAD"])?
            .ok_or_else(|| Error::RevisionNotFound {
                path: path.to_path_buf(),
                revision: "HEAD".into(),
            })
    }

    fn remote_url(&self, path: &Path) -> Result<Option<String>> {
        self.ensure_module(path)?;
        Ok(self
            .query(path, &["config", "--get", "remote.origin.url"])?
            .filter(|url| !url.is_empty()))
    }

    fn remote_branches(&self, path: &Path) -> Result<Vec<String>> {
        self.ensure_module(path)?;
        let listing = self
            .query(
                path,
                &[
                    "for-each-ref",
                    "--format=%(refname:strip=3)",
                    "refs/remotes/origin",
                ],
            )?
            .unwrap_or_default();

        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|b| !b.is_empty() && *b != "HEAD")
            .map(str::to_string)
            .collect())
    }

    fn default_branch(&self, path: &Path) -> Result<String> {
        self.ensure_module(path)?;

        if let Some(symref) = self.query(
            path,
            &["symbolic-ref", "--quiet", "refs/remotes/origin/HEAD"],
        )? && let Some(branch) = symref.strip_prefix("refs/remotes/origin/")
        {
            return Ok(branch.to_string());
        }

        let branches = self.remote_branches(path)?;
        if let Some(current) = self.query(path, &["rev-parse", "--abbrev-ref", "HEAD"])?
            && branches.contains(&current)
        {
            return Ok(current);
        }
        for candidate in ["main", "master"] {
            if branches.iter().any(|b| b == candidate) {
                return Ok(candidate.to_string());
            }
        }

        Err(Error::RevisionNotFound {
            path: path.to_path_buf(),
            revision: "origin/HEAD".into(),
        })
    }

    fn resolve(&self, path: &Path, revision: &str) -> Result<String> {
        self.ensure_module(path)?;
        let spec = format!("{revision}^{{commit}}");
        self.query(path, &["rev-parse", "--verify", "--quiet", &spec])?
            .filter(|hash| !hash.is_empty())
            .ok_or_else(|| Error::RevisionNotFound {
                path: path.to_path_buf(),
                revision: revision.to_string(),
            })
    }

    fn log(&self, path: &Path, from: &str, to: &str) -> Result<Vec<CommitSummary>> {
        self.ensure_module(path)?;
        let range = format!("{from}..{to}");
        let listing = self
            .query(path, &["log", "--pretty=format:%h%x09%s", &range])?
            .ok_or_else(|| Error::RevisionNotFound {
                path: path.to_path_buf(),
                revision: range.clone(),
            })?;

        Ok(listing
            .lines()
            .filter_map(|line| {
                let (hash, subject) = line.split_once('\t')?;
                Some(CommitSummary::new(hash, subject))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobRunner;
    use crate::testutil::{commit, git, init_repo};

    struct Fixture {
        _dir: tempfile::TempDir,
        remote: std::path::PathBuf,
        local: std::path::PathBuf,
        first: String,
        second: String,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let remote = init_repo(&dir.path().join("remote"));
        let first = commit(&remote, "first");
        git(&remote, &["tag", "v1.0"]);
        let second = commit(&remote, "second");
        git(&remote, &["branch", "feature"]);

        let local = dir.path().join("opt").join("demo");
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        let runner = JobRunner::new(1).unwrap();
        let results = runner.run(vec![Git::default().clone_job(
            "demo",
            &remote.to_string_lossy(),
            &local,
        )]);
        assert!(results[0].is_success(), "{:?}", results[0].error());

        Fixture {
            _dir: dir,
            remote,
            local,
            first,
            second,
        }
    }

    #[test]
    fn test_inspects_cloned_module() {
        let fx = fixture();
        let git_backend = Git::default();

        assert!(git_backend.is_module(&fx.local));
        assert_eq!(git_backend.head(&fx.local).unwrap(), fx.second);
        assert_eq!(git_backend.default_branch(&fx.local).unwrap(), "main");
        assert_eq!(
            git_backend.remote_url(&fx.local).unwrap().as_deref(),
            Some(&*fx.remote.to_string_lossy())
        );

        let mut branches = git_backend.remote_branches(&fx.local).unwrap();
        branches.sort();
        assert_eq!(branches, vec!["feature", "main"]);
    }

    #[test]
    fn test_resolve_and_log() {
        let fx = fixture();
        let git_backend = Git::default();

        assert_eq!(git_backend.resolve(&fx.local, "v1.0").unwrap(), fx.first);
        assert_eq!(git_backend.resolve(&fx.local, "origin/main").unwrap(), fx.second);

        let log = git_backend.log(&fx.local, &fx.first, &fx.second).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].subject, "second");
        assert!(fx.second.starts_with(&log[0].hash));

        assert!(matches!(
            git_backend.resolve(&fx.local, "no-such-ref"),
            Err(Error::RevisionNotFound { .. })
        ));
    }

    #[test]
    fn test_plain_directory_is_not_a_module() {
        let dir = tempfile::tempdir().unwrap();
        let git_backend = Git::default();

        assert!(!git_backend.is_module(dir.path()));
        assert!(matches!(
            git_backend.head(dir.path()),
            Err(Error::NotAModule { .. })
        ));
    }

    #[test]
    fn test_fetch_then_checkout_moves_head() {
        let fx = fixture();
        let git_backend = Git::default();
        let third = commit(&fx.remote, "third");

        let runner = JobRunner::new(1).unwrap();
        let fetched = runner.run(vec![git_backend.fetch_job("demo", &fx.local)]);
        assert!(fetched[0].is_success(), "{:?}", fetched[0].error());

        let target = Target::Branch {
            name: "main".into(),
            commit: git_backend.resolve(&fx.local, "origin/main").unwrap(),
        };
        let moved = runner.run(vec![git_backend.checkout_job("demo", &fx.local, &target, false)]);
        assert!(moved[0].is_success(), "{:?}", moved[0].error());
        assert_eq!(git_backend.head(&fx.local).unwrap(), third);

        let detach = Target::Revision {
            revision: "v1.0".into(),
            commit: fx.first.clone(),
        };
        runner.run(vec![git_backend.checkout_job("demo", &fx.local, &detach, true)]);
        assert_eq!(git_backend.head(&fx.local).unwrap(), fx.first);
    }

    #[test]
    fn test_jobs_carry_configured_program_and_timeout() {
        let git_backend = Git::new("/opt/git/bin/git").with_timeout(Duration::from_secs(5));
        let job = git_backend.fetch_job("demo", Path::new("/tmp/demo"));

        assert_eq!(job.program, "/opt/git/bin/git");
        assert_eq!(job.timeout, Duration::from_secs(5));
        assert_eq!(job.phase, Phase::Fetch);
        assert!(job.env.contains(&("GIT_TERMINAL_PROMPT".into(), "0".into())));
    }
}
