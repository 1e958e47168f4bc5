//! `patch` task: apply a unified diff to a directory tree
//!
//! The diff is parsed with the `patch` crate and applied in memory. Every
//! file is checked before anything is written, so a patch that does not
//! apply leaves the tree untouched. A patch whose result is already in
//! place is reported as up-to-date.

use anyhow::{Context, Result, anyhow, bail};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::fsutil;
use super::output::Output;
use crate::config::{self, Config};

const DEV_NULL: &str = "/dev/null";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    /// Directory the patch paths are relative to
    pub dir: PathBuf,
    /// Local patch file, relative to the role directory
    #[serde(default)]
    pub patch: Option<PathBuf>,
    /// Inline diff in a blueprint; base64 once prepared
    #[serde(default)]
    pub content: Option<String>,
    /// Leading path components to strip, like `patch -p`
    #[serde(default)]
    pub strip: usize,
    #[serde(default)]
    pub dry_run: bool,
}

impl Params {
    pub fn prepare(&mut self, role_dir: &Path, _config: &Config) -> Result<()> {
        let data = match (self.content.take(), self.patch.take()) {
            (Some(content), None) => content.into_bytes(),
            (None, Some(patch)) => {
                let path = role_dir.join(&patch);
                fs::read(&path).with_context(|| format!("Could not read {}", path.display()))?
            }
            (Some(_), Some(_)) => bail!("only one of `content` and `patch` may be set"),
            (None, None) => bail!("either `content` or `patch` is required"),
        };
        self.content = Some(BASE64.encode(data));
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
        let text = String::from_utf8(data).context("patch is not valid UTF-8")?;
        let files =
            ::patch::Patch::from_multiple(&text).map_err(|e| anyhow!("invalid patch: {e}"))?;
        if files.is_empty() {
            bail!("patch contains no files");
        }

        let mut planned = Vec::with_capacity(files.len());
        for file in &files {
            planned.push(plan(&params.dir, params.strip, file)?);
        }

        let mut changes = Vec::new();
        for (path, action) in planned {
            match action {
                Action::Keep => {}
                Action::Write(content) => {
                    if let Some(parent) = path.parent() {
                        changes.extend(fsutil::mkdir_all(
                            parent,
                            config::DEFAULT_DIR_MODE,
                            params.dry_run,
                        )?);
                    }
                    changes.extend(fsutil::write_file(
                        &path,
                        content.as_bytes(),
                        config::DEFAULT_FILE_MODE,
                        params.dry_run,
                    )?);
                }
                Action::Remove => changes.extend(fsutil::remove(&path, params.dry_run)?),
            }
        }

        Ok(Output::from_changes([("patch", changes)]))
    }
}

/// What one file of the patch needs
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Keep,
    Write(String),
    Remove,
}

fn plan(dir: &Path, strip: usize, file: &::patch::Patch) -> Result<(PathBuf, Action)> {
    let creates = file.old.path == DEV_NULL;
    let deletes = file.new.path == DEV_NULL;
    let name = if deletes { &file.old.path } else { &file.new.path };
    let path = dir.join(strip_path(name, strip)?);

    let current = match fs::read_to_string(&path) {
        Ok(current) => Some(current),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let action = match current {
        None if deletes => Action::Keep,
        None if creates => Action::Write(apply(&path, "", file)?.unwrap_or_default()),
        None => bail!("{}: no such file", path.display()),
        Some(current) if deletes => {
            if apply(&path, &current, file)?.is_some_and(|rest| rest.is_empty()) {
                Action::Remove
            } else {
                bail!("{}: content does not match the removal", path.display())
            }
        }
        Some(current) => match apply(&path, &current, file)? {
            Some(patched) if patched != current => Action::Write(patched),
            _ => Action::Keep,
        },
    };
    Ok((path, action))
}

/// Drop `strip` leading components of a patch path
fn strip_path(name: &str, strip: usize) -> Result<PathBuf> {
    let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let kept = parts.get(strip..).unwrap_or_default();
    if kept.is_empty() {
        bail!("{name}: nothing left after stripping {strip} components");
    }
    if kept.contains(&"..") {
        bail!("{name}: path escapes the patched directory");
    }
    Ok(kept.iter().collect())
}

/// Apply every hunk of `file` to `text`.
///
/// Returns `None` when the patch is already applied.
fn apply(path: &Path, text: &str, file: &::patch::Patch) -> Result<Option<String>> {
    let lines: Vec<&str> = text.lines().collect();
    let hunks: Vec<Hunk> = file.hunks.iter().map(Hunk::new).collect();

    if !hunks.is_empty() && is_applied(&lines, &hunks) {
        return Ok(None);
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut cursor = 0;
    for (n, hunk) in hunks.iter().enumerate() {
        let at = if hunk.old.is_empty() {
            hunk.old_at.clamp(cursor, lines.len())
        } else {
            locate(&lines, &hunk.old, cursor, hunk.old_at).ok_or_else(|| {
                anyhow!("{}: hunk {} does not apply", path.display(), n + 1)
            })?
        };
        out.extend_from_slice(&lines[cursor..at]);
        out.extend_from_slice(&hunk.new);
        cursor = at + hunk.old.len();
    }
    out.extend_from_slice(&lines[cursor..]);

    let mut patched = out.join("\n");
    let trailing_newline = text.is_empty() || text.ends_with('\n');
    if !out.is_empty() && file.end_newline && trailing_newline {
        patched.push('\n');
    }
    Ok(Some(patched))
}

/// Whether every hunk's result is already in place, in order
fn is_applied(lines: &[&str], hunks: &[Hunk]) -> bool {
    let mut cursor = 0;
    for hunk in hunks {
        if hunk.new.is_empty() {
            // A pure removal is done once its lines are gone.
            if locate(lines, &hunk.old, cursor, hunk.new_at).is_some() {
                return false;
            }
            continue;
        }
        match locate(lines, &hunk.new, cursor, hunk.new_at) {
            Some(at) => cursor = at + hunk.new.len(),
            None => return false,
        }
    }
    true
}

/// Position of `needle` at or after `from`, closest to `expected`
fn locate(lines: &[&str], needle: &[&str], from: usize, expected: usize) -> Option<usize> {
    if needle.len() > lines.len() {
        return None;
    }
    (from..=lines.len() - needle.len())
        .filter(|&at| lines[at..at + needle.len()] == *needle)
        .min_by_key(|&at| at.abs_diff(expected))
}

/// The two sides of a hunk, with 0-based expected positions
struct Hunk<'a> {
    old: Vec<&'a str>,
    new: Vec<&'a str>,
    old_at: usize,
    new_at: usize,
}

impl<'a> Hunk<'a> {
    fn new(hunk: &::patch::Hunk<'a>) -> Self {
        let mut old = Vec::new();
        let mut new = Vec::new();
        for line in &hunk.lines {
            match line {
                ::patch::Line::Context(l) => {
                    old.push(*l);
                    new.push(*l);
                }
                ::patch::Line::Remove(l) => old.push(*l),
                ::patch::Line::Add(l) => new.push(*l),
            }
        }
        Self {
            old_at: position(hunk.old_range.start, old.is_empty()),
            new_at: position(hunk.new_range.start, new.is_empty()),
            old,
            new,
        }
    }
}

/// A unified diff range starts at 1, or names the line before an empty side.
fn position(start: u64, empty: bool) -> usize {
    let start = start as usize;
    if empty { start } else { start.saturating_sub(1) }
}
