//! Run configuration
//!
//! Layered as: built-in defaults, the user's `config.toml`, a blueprint's
//! `[config]` table, then CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::paths;

pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub default_file_mode: u32,
    pub default_dir_mode: u32,
    #[serde(skip)]
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_file_mode: DEFAULT_FILE_MODE,
            default_dir_mode: DEFAULT_DIR_MODE,
            dry_run: false,
        }
    }
}

/// Partial configuration, as found in a blueprint's `[config]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub default_file_mode: Option<u32>,
    pub default_dir_mode: Option<u32>,
}

impl Config {
    /// Load the user configuration.
    ///
    /// `path` wins over the config directory; a missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => paths::config_file()?,
        };

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a blueprint
    pub fn merge(&mut self, overrides: &ConfigOverrides) {
        if let Some(mode) = overrides.default_file_mode {
            self.default_file_mode = mode;
        }
        if let Some(mode) = overrides.default_dir_mode {
            self.default_dir_mode = mode;
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (key, mode) in [
            ("default_file_mode", self.default_file_mode),
            ("default_dir_mode", self.default_dir_mode),
        ] {
            if mode > 0o7777 {
                anyhow::bail!("{key}: {mode:#o} is not a valid mode");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(Some(&tmp.path().join("config.toml"))).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.default_file_mode, 0o644);
        assert_eq!(config.default_dir_mode, 0o755);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_load_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "default_file_mode = 0o600\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.default_file_mode, 0o600);
        assert_eq!(config.default_dir_mode, 0o755);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "dry_run = true\n").unwrap();

        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_invalid_mode_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "default_dir_mode = 0o77777\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("default_dir_mode"));
    }

    #[test]
    fn test_merge_overrides() {
        let mut config = Config::default();
        config.merge(&ConfigOverrides {
            default_file_mode: None,
            default_dir_mode: Some(0o700),
        });
        assert_eq!(config.default_file_mode, 0o644);
        assert_eq!(config.default_dir_mode, 0o700);
    }
}
