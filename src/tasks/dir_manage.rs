//! `dir_manage` task: mirror a local directory tree onto the target
//!
//! The tree is read on the driving side while the task is decoded and
//! travels as a map of destination path to base64 content.

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::fsutil;
use super::output::Output;
use crate::config::{self, Config};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    /// Source directory, relative to the role directory
    pub src: PathBuf,
    pub dst: PathBuf,
    /// Glob patterns matched against paths relative to `src`
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub content: BTreeMap<PathBuf, String>,
    #[serde(default)]
    pub file_mode: Option<u32>,
    #[serde(default)]
    pub dir_mode: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
}

impl Params {
    pub fn prepare(&mut self, role_dir: &Path, config: &Config) -> Result<()> {
        let base = role_dir.join(&self.src);
        let patterns = self
            .exclude
            .iter()
            .map(|p| glob::Pattern::new(p).with_context(|| format!("invalid exclude pattern {p}")))
            .collect::<Result<Vec<_>>>()?;

        self.content.clear();
        for entry in WalkDir::new(&base).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Could not walk {}", base.display()))?;
            if entry.file_type().is_dir() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&base)
                .with_context(|| format!("Failed to strip prefix from {}", entry.path().display()))?;
            if patterns.iter().any(|p| p.matches_path(relative)) {
                log::debug!("excluding {}", relative.display());
                continue;
            }

            let data = fs::read(entry.path())
                .with_context(|| format!("Could not read {}", entry.path().display()))?;
            self.content
                .insert(self.dst.join(relative), BASE64.encode(data));
        }

        self.file_mode.get_or_insert(config.default_file_mode);
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
        let file_mode = params.file_mode.unwrap_or(config::DEFAULT_FILE_MODE);
        let dir_mode = params.dir_mode.unwrap_or(config::DEFAULT_DIR_MODE);
        let dry_run = params.dry_run;

        let mut mkdir = Vec::new();
        let mut files = Vec::new();
        let mut permissions = Vec::new();

        for (path, content) in &params.content {
            let data = BASE64
                .decode(content)
                .with_context(|| format!("content of {} is not valid base64", path.display()))?;

            let parent = path.parent().unwrap_or_else(|| Path::new("/"));
            mkdir.extend(fsutil::mkdir_all(parent, dir_mode, dry_run)?);
            files.extend(fsutil::write_file(path, &data, file_mode, dry_run)?);
            permissions.extend(fsutil::chmod(path, file_mode, dry_run)?);
        }

        Ok(Output::from_changes([
            ("mkdir", mkdir),
            ("file", files),
            ("permissions", permissions),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc::Executor as _;
    use tempfile::TempDir;

    fn role_with_tree() -> TempDir {
        let role = TempDir::new().unwrap();
        let tree = role.path().join("files").join("site");
        fs::create_dir_all(tree.join("css")).unwrap();
        fs::write(tree.join("index.html"), "<h1>hi</h1>").unwrap();
        fs::write(tree.join("css").join("main.css"), "body {}").unwrap();
        fs::write(tree.join("notes.bak"), "skip me").unwrap();
        role
    }

    fn params(dst: &Path) -> Params {
        Params {
            src: PathBuf::from("files/site"),
            dst: dst.to_path_buf(),
            exclude: vec!["*.bak".to_string()],
            content: BTreeMap::new(),
            file_mode: None,
            dir_mode: None,
            dry_run: false,
        }
    }

    #[test]
    fn test_prepare_collects_tree() {
        let role = role_with_tree();
        let mut p = params(Path::new("/srv/www"));
        p.prepare(role.path(), &Config::default()).unwrap();

        let paths: Vec<_> = p.content.keys().cloned().collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/srv/www/css/main.css"),
                PathBuf::from("/srv/www/index.html"),
            ]
        );
        assert_eq!(p.file_mode, Some(0o644));
    }

    #[test]
    fn test_mirrors_tree_idempotently() {
        let role = role_with_tree();
        let target = TempDir::new().unwrap();
        let dst = target.path().join("www");

        let mut p = params(&dst);
        p.prepare(role.path(), &Config::default()).unwrap();

        let first = Executor.execute(p.clone()).unwrap();
        assert!(first.changed);
        assert_eq!(fs::read_to_string(dst.join("css").join("main.css")).unwrap(), "body {}");
        assert!(!dst.join("notes.bak").exists());

        let second = Executor.execute(p).unwrap();
        assert!(!second.changed);
    }
}
