//! Bindings attach roles to hosts by name or tag

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::role::Role;
use crate::hosts::Host;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Binding {
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Role directories, relative to the file declaring the binding
    #[serde(default, rename = "roles")]
    pub role_dirs: Vec<PathBuf>,
    #[serde(skip)]
    pub roles: Vec<Role>,
    /// Hosts whose outputs any of the roles read
    #[serde(skip)]
    pub dependencies: Vec<String>,
}

impl Binding {
    /// Anchor relative role directories at `base`
    pub fn resolve(&mut self, base: &Path) {
        for dir in &mut self.role_dirs {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    /// Load every role and collect their dependencies
    pub fn partial_decode(&mut self) -> Result<()> {
        let mut roles: Vec<Role> = Vec::new();
        for dir in &self.role_dirs {
            let role = Role::load(dir).with_context(|| format!("binding {}", self.name))?;
            if roles.iter().any(|r| r.name == role.name) {
                bail!("binding {}: role \"{}\" is not unique", self.name, role.name);
            }
            roles.push(role);
        }

        let mut dependencies: Vec<String> = Vec::new();
        for dep in roles.iter().flat_map(|r| &r.dependencies) {
            if !dependencies.contains(dep) {
                dependencies.push(dep.clone());
            }
        }

        self.roles = roles;
        self.dependencies = dependencies;
        Ok(())
    }

    /// Whether the host is listed or shares a tag
    pub fn matches(&self, host: &Host) -> bool {
        self.hosts.contains(&host.name) || host.tags.iter().any(|t| self.tags.contains(t))
    }
}
