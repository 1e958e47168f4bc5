//! `file_manage` task: converge one file's content and mode

use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::fsutil;
use super::output::Output;
use crate::config::{self, Config};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub dst: PathBuf,
    /// Plain text in a blueprint; base64 once prepared
    #[serde(default)]
    pub content: Option<String>,
    /// Local source file, relative to the role directory
    #[serde(default)]
    pub src: Option<PathBuf>,
    #[serde(default)]
    pub file_mode: Option<u32>,
    #[serde(default)]
    pub dir_mode: Option<u32>,
    #[serde(default)]
    pub ignore_dir_mode: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl Params {
    /// Resolve `content`/`src` into base64 content and fill default modes
    pub fn prepare(&mut self, role_dir: &Path, config: &Config) -> Result<()> {
        let data = match (self.content.take(), self.src.take()) {
            (Some(content), None) => content.into_bytes(),
            (None, Some(src)) => {
                let path = role_dir.join(&src);
                fs::read(&path).with_context(|| format!("Could not read {}", path.display()))?
            }
            (Some(_), Some(_)) => bail!("only one of `content` and `src` may be set"),
            (None, None) => bail!("either `content` or `src` is required"),
        };

        self.content = Some(BASE64.encode(data));
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
        let data = BASE64
            .decode(params.content.as_deref().unwrap_or_default())
            .context("content is not valid base64")?;
        let file_mode = params.file_mode.unwrap_or(config::DEFAULT_FILE_MODE);
        let dir_mode = params.dir_mode.unwrap_or(config::DEFAULT_DIR_MODE);
        let dry_run = params.dry_run;

        let parent = params.dst.parent().unwrap_or_else(|| Path::new("/"));
        let mkdir = fsutil::mkdir_all(parent, dir_mode, dry_run)?;

        let mut permissions = if params.ignore_dir_mode {
            Vec::new()
        } else {
            fsutil::chmod(parent, dir_mode, dry_run)?
        };

        let file = fsutil::write_file(&params.dst, &data, file_mode, dry_run)?;
        permissions.extend(fsutil::chmod(&params.dst, file_mode, dry_run)?);

        Ok(Output::from_changes([
            ("mkdir", mkdir),
            ("file", file),
            ("permissions", permissions),
        ]))
    }
}
