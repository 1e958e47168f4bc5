//! Idempotent filesystem primitives shared by the file-oriented tasks.
//!
//! Each helper returns the human-readable changes it made (or would make
//! under `dry_run`); an empty list means the path was already converged.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

/// Create every missing directory of `dir` with `mode`
pub fn mkdir_all(dir: &Path, mode: u32, dry_run: bool) -> Result<Vec<String>> {
    let mut changes = Vec::new();
    let mut current = PathBuf::new();

    for component in dir.components() {
        current.push(component);
        if matches!(component, Component::RootDir | Component::Prefix(_)) {
            continue;
        }
        if fs::symlink_metadata(&current).is_ok() {
            continue;
        }

        if !dry_run {
            fs::DirBuilder::new()
                .mode(mode)
                .create(&current)
                .with_context(|| format!("Failed to create {}", current.display()))?;
        }
        changes.push(format!("{}: {mode:#o}", current.display()));
    }

    Ok(changes)
}

/// Set the permission bits of `path` to `mode`.
///
/// `EPERM` is ignored: the path is owned by someone else.
pub fn chmod(path: &Path, mode: u32, dry_run: bool) -> Result<Vec<String>> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if dry_run && e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    };

    let old = meta.permissions().mode() & 0o7777;
    if old == mode {
        return Ok(Vec::new());
    }

    if !dry_run {
        match fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                log::debug!("not changing mode of {}: {e}", path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to chmod {}", path.display()));
            }
        }
    }

    Ok(vec![format!("{}: {old:#o} -> {mode:#o}", path.display())])
}

/// Write `data` to `path` unless it already holds exactly that content
pub fn write_file(path: &Path, data: &[u8], mode: u32, dry_run: bool) -> Result<Vec<String>> {
    let current = match fs::read(path) {
        Ok(current) => Some(current),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let change = match &current {
        Some(current) if current == data => return Ok(Vec::new()),
        Some(current) => format!("{}: {}", path.display(), describe_change(current, data)),
        None => format!("{}: wrote {} bytes", path.display(), data.len()),
    };

    if !dry_run {
        if current.is_none() {
            fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(mode)
                .open(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
        }
        fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(vec![change])
}

/// Remove a file, symlink or directory tree
pub fn remove(path: &Path, dry_run: bool) -> Result<Vec<String>> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    };

    if !dry_run {
        let result = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.with_context(|| format!("Failed to remove {}", path.display()))?;
    }

    Ok(vec![format!("{}: removed", path.display())])
}

/// Line diff of two contents, or a size note for binary data
fn describe_change(old: &[u8], new: &[u8]) -> String {
    let (Ok(old), Ok(new)) = (std::str::from_utf8(old), std::str::from_utf8(new)) else {
        return format!("binary content changed ({} -> {} bytes)", old.len(), new.len());
    };

    let diff = similar::TextDiff::from_lines(old, new);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            similar::ChangeTag::Delete => '-',
            similar::ChangeTag::Insert => '+',
            similar::ChangeTag::Equal => continue,
        };
        out.push('\n');
        out.push(sign);
        out.push_str(change.value().trim_end_matches('\n'));
    }
    out
}
