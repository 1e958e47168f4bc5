//! Roles: directories of task files

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::tasks::Task;

/// Names a task may not take; they are attributes of the role scope
const RESERVED: &[&str] = &["condition", "task", "name"];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoleFile {
    #[serde(default, rename = "task")]
    tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    pub name: String,
    pub dir: PathBuf,
    pub tasks: Vec<Task>,
    /// Hosts whose outputs any task reads
    pub dependencies: Vec<String>,
}

impl Role {
    /// Read every `*.toml` below `dir`, in path order
    pub fn load(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Invalid role directory {}", dir.display()))?;
        if !dir.is_dir() {
            bail!("role {name}: {} is not a directory", dir.display());
        }

        let mut tasks = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Could not walk {}", dir.display()))?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().is_none_or(|ext| !ext.eq_ignore_ascii_case("toml"))
            {
                continue;
            }

            log::debug!("decoding {}", path.display());
            let content = fs::read_to_string(path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            let file: RoleFile = toml::from_str(&content)
                .with_context(|| format!("Invalid role file {}", path.display()))?;
            tasks.extend(file.tasks);
        }

        let mut role = Self {
            name,
            dir: dir.to_path_buf(),
            tasks,
            dependencies: Vec::new(),
        };
        role.partial_decode()?;
        Ok(role)
    }

    fn partial_decode(&mut self) -> Result<()> {
        let mut seen: Vec<&str> = RESERVED.to_vec();
        for task in &self.tasks {
            if seen.contains(&task.name.as_str()) {
                bail!("role {}: task \"{}\" is not unique", self.name, task.name);
            }
            seen.push(&task.name);
        }

        let mut dependencies = Vec::new();
        for task in &mut self.tasks {
            task.partial_decode()
                .with_context(|| format!("role {}", self.name))?;
            for dep in &task.dependencies {
                if !dependencies.contains(dep) {
                    dependencies.push(dep.clone());
                }
            }
        }
        self.dependencies = dependencies;
        Ok(())
    }
}
