//! Scratch git repositories for tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Run git in `dir` with a fixed identity and return trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=plugkit",
            "-c",
            "user.email=plugkit@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "tag.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("git is installed");
    assert!(
        output.status.success(),
        "git {args:?} failed in {}: {}",
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create a repository at `dir` whose HEAD points at `main`.
pub fn init_repo(dir: &Path) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    dir.to_path_buf()
}

/// Commit a change and return the new full hash.
pub fn commit(dir: &Path, message: &str) -> String {
    let file = dir.join("CHANGES");
    let mut contents = fs::read_to_string(&file).unwrap_or_default();
    contents.push_str(message);
    contents.push('\n');
    fs::write(&file, contents).unwrap();
    git(dir, &["add", "CHANGES"]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}
