//! Blueprints: hosts, variables and role bindings for one apply run
//!
//! Loading a blueprint is the partial-decode phase. Files are read and
//! merged, hosts are filtered, roles are loaded and every host's
//! dependencies are computed, all without evaluating a single expression.
//! Evaluation happens later, per host, against [`Blueprint::context`].

pub mod binding;
pub mod dependencies;
pub mod role;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub use binding::Binding;
pub use dependencies::Dependencies;
pub use role::Role;

use crate::config::{Config, ConfigOverrides};
use crate::hosts::{Filter, Host};
use crate::tasks::Outputs;

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Blueprint file or directory
    pub path: PathBuf,
    pub config: Config,
    pub filter: Filter,
    pub dry_run: bool,
}

/// One blueprint file as written
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlueprintFile {
    #[serde(default)]
    include: Vec<PathBuf>,
    #[serde(default)]
    config: Option<ConfigOverrides>,
    #[serde(default)]
    vars: Map<String, Value>,
    #[serde(default, rename = "host")]
    hosts: Vec<Host>,
    #[serde(default, rename = "bind")]
    bindings: Vec<Binding>,
}

#[derive(Debug, Clone)]
pub struct Blueprint {
    pub config: Config,
    pub vars: Map<String, Value>,
    /// Selected hosts, in declaration order
    pub hosts: Vec<Host>,
    pub bindings: Vec<Binding>,
    pub dependencies: Dependencies,
}

impl Blueprint {
    /// Read, merge and partially decode the blueprint at `opts.path`
    pub fn load(opts: &Options) -> Result<Self> {
        let mut loader = Loader::default();
        loader.load(&opts.path)?;

        let mut config = opts.config.clone();
        for overrides in &loader.config {
            config.merge(overrides);
        }
        config.validate()?;
        config.dry_run = opts.dry_run;

        let mut seen = BTreeSet::new();
        for host in &loader.hosts {
            host.validate()?;
            if !seen.insert(host.name.as_str()) {
                bail!("host \"{}\" is not unique", host.name);
            }
        }

        let mut hosts = Vec::new();
        for mut host in loader.hosts {
            if !host.matches(&opts.filter) {
                log::debug!("{}: not selected", host.name);
                continue;
            }
            host.partial_decode()?;
            hosts.push(host);
        }

        let mut bindings = loader.bindings;
        for binding in &mut bindings {
            binding.partial_decode()?;
        }

        let dependencies = resolve_dependencies(&hosts, &bindings)?;

        Ok(Self {
            config,
            vars: loader.vars,
            hosts,
            bindings,
            dependencies,
        })
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Roles bound to `host`, in binding order
    pub fn roles_for<'a>(&'a self, host: &'a Host) -> impl Iterator<Item = &'a Role> + 'a {
        self.bindings
            .iter()
            .filter(move |b| b.matches(host))
            .flat_map(|b| &b.roles)
    }

    /// Evaluation context for `host`
    pub fn context(&self, host: &Host, facts: &Value, outputs: &Outputs) -> Value {
        let hosts: Map<String, Value> = self
            .hosts
            .iter()
            .map(|h| (h.name.clone(), h.value()))
            .collect();

        json!({
            "fact": facts,
            "var": self.vars,
            "host": hosts,
            "out": outputs.variables(Some(&host.name)),
        })
    }
}

/// Host dependencies: declared, referenced, and inherited from every
/// binding that matches the host.
///
/// A host naming itself is kept so the cycle check reports it; only
/// `out.this` is exempt, and that never reaches this list.
fn resolve_dependencies(hosts: &[Host], bindings: &[Binding]) -> Result<Dependencies> {
    let mut dependencies = Dependencies::new();

    for host in hosts {
        let mut deps: Vec<String> = Vec::new();
        let inherited = bindings
            .iter()
            .filter(|b| b.matches(host))
            .flat_map(|b| &b.dependencies);
        for dep in host.dependencies.iter().chain(inherited) {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }

        for dep in &deps {
            if !hosts.iter().any(|h| &h.name == dep) {
                bail!(
                    "{} depends on {dep} but {dep} is not scheduled to be applied",
                    host.name
                );
            }
        }

        dependencies.insert(host.name.clone(), deps);
    }

    Ok(dependencies)
}

/// Accumulates blueprint files, following includes
#[derive(Debug, Default)]
struct Loader {
    visited: BTreeSet<PathBuf>,
    config: Vec<ConfigOverrides>,
    vars: Map<String, Value>,
    hosts: Vec<Host>,
    bindings: Vec<Binding>,
}

impl Loader {
    /// Load a file, or every `*.toml` directly inside a directory
    fn load(&mut self, path: &Path) -> Result<()> {
        let meta =
            fs::metadata(path).with_context(|| format!("Could not read {}", path.display()))?;
        if !meta.is_dir() {
            return self.load_file(path);
        }

        let mut files = Vec::new();
        for entry in
            fs::read_dir(path).with_context(|| format!("Could not read {}", path.display()))?
        {
            let file = entry?.path();
            if file.is_file()
                && file
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
            {
                files.push(file);
            }
        }
        files.sort();

        for file in files {
            self.load_file(&file)?;
        }
        Ok(())
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("Could not resolve {}", path.display()))?;
        if !self.visited.insert(canonical) {
            log::debug!("{} is already loaded", path.display());
            return Ok(());
        }

        log::debug!("decoding {}", path.display());
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let file: BlueprintFile = toml::from_str(&content)
            .with_context(|| format!("Invalid blueprint {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));

        if let Some(config) = file.config {
            self.config.push(config);
        }
        for (key, value) in file.vars {
            if self.vars.contains_key(&key) {
                bail!("{}: variable \"{key}\" is already defined", path.display());
            }
            self.vars.insert(key, value);
        }
        self.hosts.extend(file.hosts);
        for mut binding in file.bindings {
            binding.resolve(base);
            self.bindings.push(binding);
        }

        for include in file.include {
            let include = if include.is_relative() {
                base.join(include)
            } else {
                include
            };
            self.load(&include)
                .with_context(|| format!("included from {}", path.display()))?;
        }
        Ok(())
    }
}
