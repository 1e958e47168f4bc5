//! `symlink` task
//!
//! Links `dst` to `src`, or with `link_contents` links every entry of the
//! `src` directory into `dst`. Anything in the way of a link is removed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::fsutil;
use super::output::Output;
use crate::config::{self, Config};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub src: PathBuf,
    pub dst: PathBuf,
    #[serde(default)]
    pub link_contents: bool,
    /// Glob patterns matched against entry names when linking contents
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub dir_mode: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
}

impl Params {
    /// Anchor a relative `src` at the role directory
    pub fn prepare(&mut self, role_dir: &Path, config: &Config) -> Result<()> {
        if self.src.is_relative() {
            self.src = role_dir.join(&self.src);
        }
        self.dir_mode.get_or_insert(config.default_dir_mode);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Executor;

impl rpc::Executor for Executor {
    type Params = Params;
    type Output = Output;

    fn execute(&self, params: Params) -> Result<Output> {
        let dir_mode = params.dir_mode.unwrap_or(config::DEFAULT_DIR_MODE);
        let dry_run = params.dry_run;
        let mut changes = Vec::new();

        if params.link_contents {
            let patterns = params
                .exclude
                .iter()
                .map(|p| {
                    glob::Pattern::new(p).with_context(|| format!("invalid exclude pattern {p}"))
                })
                .collect::<Result<Vec<_>>>()?;

            let mut entries = fs::read_dir(&params.src)
                .with_context(|| format!("Could not read {}", params.src.display()))?
                .collect::<std::io::Result<Vec<_>>>()?;
            entries.sort_by_key(fs::DirEntry::file_name);

            for entry in entries {
                let name = entry.file_name();
                let name_str = name.to_string_lossy();
                if patterns.iter().any(|p| p.matches(&name_str)) {
                    continue;
                }

                changes.extend(fsutil::mkdir_all(&params.dst, dir_mode, dry_run)?);
                changes.extend(link(
                    &params.src.join(&name),
                    &params.dst.join(&name),
                    dry_run,
                )?);
            }
        } else {
            let parent = params.dst.parent().unwrap_or_else(|| Path::new("/"));
            changes.extend(fsutil::mkdir_all(parent, dir_mode, dry_run)?);
            changes.extend(link(&params.src, &params.dst, dry_run)?);
        }

        Ok(Output::from_changes([("changes", changes)]))
    }
}

/// Point `dst` at `src`, replacing whatever is there
fn link(src: &Path, dst: &Path, dry_run: bool) -> Result<Vec<String>> {
    let mut changes = Vec::new();

    match fs::symlink_metadata(dst) {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                let target = fs::read_link(dst)
                    .with_context(|| format!("Failed to read symlink {}", dst.display()))?;
                if target == src {
                    return Ok(changes);
                }
            }
            changes.extend(fsutil::remove(dst, dry_run)?);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", dst.display())),
    }

    if !dry_run {
        std::os::unix::fs::symlink(src, dst).with_context(|| {
            format!(
                "Failed to create symlink: {} -> {}",
                dst.display(),
                src.display()
            )
        })?;
    }

    changes.push(format!("{}: symlink from {}", dst.display(), src.display()));
    Ok(changes)
}
