//! plugsync configuration file
//!
//! ```toml
//! silent = false
//!
//! [job]
//! n_threads = 8
//! timeout = 30000        # milliseconds
//!
//! [path]
//! package = "~/.local/share/plugsync"
//! snapshot = "~/dotfiles/plugsync.snapshot"
//! log = "~/.local/share/plugsync/update.log"
//!
//! [git]
//! cmd = "git"
//! default_url_format = "https://github.com/%s"
//!
//! plugins = [
//!     "nvim-lua/plenary.nvim",
//!     { source = "nvim-telescope/telescope.nvim", checkout = "0.1.8", depends = ["nvim-lua/plenary.nvim"] },
//! ]
//! ```

use anyhow::{Context, Result, bail};
use plugkit::{EngineConfig, SpecInput};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Suppress everything but errors
    pub silent: bool,
    pub job: JobConfig,
    pub path: PathConfig,
    pub git: GitConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<SpecInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_threads: Option<usize>,
    /// Per-job timeout in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_url_format: Option<String>,
}

impl Config {
    /// Load from `path`. A missing file yields the default config.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))
    }

    /// Write to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Could not write config file: {}", path.display()))
    }

    /// Append plugins not already declared. Returns how many were added.
    pub fn add_plugins(&mut self, inputs: &[SpecInput]) -> usize {
        let mut added = 0;
        for input in inputs {
            let label = input.label();
            if self.plugins.iter().any(|p| p.label() == label) {
                continue;
            }
            self.plugins.push(input.clone());
            added += 1;
        }
        added
    }

    /// Resolve paths and defaults into an engine configuration.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let package = match &self.path.package {
            Some(p) => paths::expand(p),
            None => paths::data_dir()?,
        };
        let mut config = EngineConfig::new(package);

        if let Some(n) = self.job.n_threads {
            config.n_threads = n;
        }
        if let Some(ms) = self.job.timeout {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(snapshot) = &self.path.snapshot {
            config.snapshot_path = paths::expand(snapshot);
        }
        if let Some(log) = &self.path.log {
            config.log_path = paths::expand(log);
        }
        if let Some(cmd) = &self.git.cmd {
            config.git_cmd = cmd.clone();
        }
        if let Some(format) = &self.git.default_url_format {
            if !format.contains("%s") {
                bail!("git.default_url_format must contain '%s': {format}");
            }
            config.url_format = format.clone();
        }

        config
            .validate()
            .context("Invalid plugsync configuration")?;
        Ok(config)
    }
}

/// Config file path: explicit flag, else the default location.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => paths::config_file(),
    }
}
