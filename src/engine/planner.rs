//! Splitting a blueprint into the local phase and the scheduled phase

use anyhow::{Result, bail};

use crate::blueprint::{Blueprint, Dependencies};
use crate::hosts::HostKind;

/// Order in which a blueprint's hosts are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Local hosts, applied one after another before anything else
    pub local: Vec<String>,
    /// Remaining hosts, applied in parallel by the scheduler
    pub remote: Vec<String>,
    /// Dependencies of the remote hosts, local hosts already removed
    pub dependencies: Dependencies,
}

impl ExecutionPlan {
    pub fn new(blueprint: &Blueprint) -> Result<Self> {
        if let Some(host) = blueprint.dependencies.find_circular_dependencies() {
            bail!("circular dependency in {host}");
        }

        let mut local: Vec<String> = Vec::new();
        let mut remote = Vec::new();
        for host in &blueprint.hosts {
            if host.kind != HostKind::Local {
                remote.push(host.name.clone());
                continue;
            }
            for dep in blueprint.dependencies.get(&host.name) {
                if !local.contains(dep) {
                    bail!(
                        "{} is applied locally before {dep} and cannot depend on it",
                        host.name
                    );
                }
            }
            local.push(host.name.clone());
        }

        let dependencies = blueprint
            .dependencies
            .filter(&local)
            .iter()
            .filter(|(host, _)| remote.contains(*host))
            .map(|(host, deps)| (host.clone(), deps.clone()))
            .collect();

        Ok(Self {
            local,
            remote,
            dependencies,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}
