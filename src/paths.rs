//! Centralized path resolution for plugsync
//!
//! # Environment Variables
//!
//! - `PLUGSYNC_CONFIG_DIR` - Override config directory (e.g., `~/dotfiles/plugsync`)
//! - `PLUGSYNC_DATA_DIR` - Override data directory (package root)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `PLUGSYNC_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/plugsync` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\plugsync`
//!    - macOS/Linux: `~/.config/plugsync`
//!
//! For data_dir():
//! 1. `PLUGSYNC_DATA_DIR` environment variable
//! 2. `XDG_DATA_HOME/plugsync` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\plugsync`
//!    - macOS/Linux: `~/.local/share/plugsync`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "PLUGSYNC_CONFIG_DIR";

/// Environment variable for data directory override
pub const ENV_DATA_DIR: &str = "PLUGSYNC_DATA_DIR";

const APP: &str = "plugsync";

/// Config file name inside [`config_dir`]
pub const CONFIG_FILE: &str = "plugsync.toml";

/// Get the plugsync config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join(APP));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the plugsync data directory, the default package root
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        let path = expand(&dir);
        log::debug!("Using data dir from {}: {}", ENV_DATA_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        let path = PathBuf::from(xdg_data).join(APP);
        log::debug!("Using XDG_DATA_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            return Ok(local_app_data.join(APP));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("share").join(APP);
    log::debug!("Using default data dir: {}", path.display());
    Ok(path)
}

/// Default config file location
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Expand ~ and environment variables in a path string.
///
/// Unresolvable variables leave the input untouched.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}


#[cfg(test)]
mod tests {
    use super::test_env::{lock, with_env_var, without_env_var};
    use super::*;

    #[test]
    fn test_config_dir_env_override() {
        let _guard = lock();
        with_env_var(ENV_CONFIG_DIR, "/custom/config/path", || {
            assert_eq!(config_dir().unwrap(), PathBuf::from("/custom/config/path"));
            assert_eq!(
                config_file().unwrap(),
                PathBuf::from("/custom/config/path/plugsync.toml")
            );
        });
    }

    #[test]
    fn test_config_dir_xdg() {
        let _guard = lock();
        without_env_var(ENV_CONFIG_DIR, || {
            with_env_var("XDG_CONFIG_HOME", "/xdg/config", || {
                assert_eq!(config_dir().unwrap(), PathBuf::from("/xdg/config/plugsync"));
            });
        });
    }

    #[test]
    fn test_data_dir_env_override_expands_tilde() {
        let _guard = lock();
        with_env_var(ENV_DATA_DIR, "~/plugins", || {
            let result = data_dir().unwrap();
            let home = dirs::home_dir().unwrap();
            assert_eq!(result, home.join("plugins"));
        });
    }

    #[test]
    fn test_data_dir_xdg() {
        let _guard = lock();
        without_env_var(ENV_DATA_DIR, || {
            with_env_var("XDG_DATA_HOME", "/xdg/data", || {
                assert_eq!(data_dir().unwrap(), PathBuf::from("/xdg/data/plugsync"));
            });
        });
    }

    #[test]
    fn test_expand_env_var() {
        let _guard = lock();
        with_env_var("PLUGSYNC_TEST_ROOT", "/opt/root", || {
            assert_eq!(expand("$PLUGSYNC_TEST_ROOT/pkg"), PathBuf::from("/opt/root/pkg"));
        });
    }

    #[test]
    fn test_expand_unknown_var_is_left_alone() {
        let _guard = lock();
        without_env_var("PLUGSYNC_SURELY_UNSET", || {
            assert_eq!(
                expand("$PLUGSYNC_SURELY_UNSET/x"),
                PathBuf::from("$PLUGSYNC_SURELY_UNSET/x")
            );
        });
    }
}
