//! Centralized path resolution for orch
//!
//! # Environment Variables
//!
//! - `ORCH_CONFIG_DIR` - Override config directory (e.g., `~/dotfiles/orch`)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `ORCH_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/orch` (if set)
//! 3. `~/.config/orch`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "ORCH_CONFIG_DIR";

/// Name of the user configuration file inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Location of the worker binary on remote hosts, relative to `$HOME`
pub const REMOTE_BIN: &str = ".cache/orch/bin/orch";

/// Get the orch config directory path
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
        let path = PathBuf::from(xdg_config).join("orch");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("orch");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the user configuration file path
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Worker binary path below a remote home directory
pub fn remote_bin(home: &str) -> PathBuf {
    Path::new(home).join(REMOTE_BIN)
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left untouched.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
