//! Task types
//!
//! [`TaskParams`] is the closed set of task types. The same names are used
//! to decode a blueprint task and to dispatch it through the worker's
//! [`rpc::Registry`], so a type that decodes is always one the worker
//! knows.

pub mod cert_unbundle;
pub mod dir_manage;
pub mod exec;
pub mod facts;
pub mod file_manage;
pub mod file_remove;
pub mod fsutil;
pub mod output;
pub mod patch;
pub mod symlink;
pub mod systemd;
pub mod task;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

pub use output::{Output, Outputs};
pub use task::{DecodedTask, Task};

use crate::config::Config;

/// Every task type, by the name used in blueprints and function calls
pub const TYPES: &[&str] = &[
    "exec",
    "file_manage",
    "file_remove",
    "dir_manage",
    "symlink",
    "systemd",
    "patch",
    "cert_unbundle",
];

/// Resolved parameters of one task, tagged by type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskParams {
    Exec(exec::Params),
    FileManage(file_manage::Params),
    FileRemove(file_remove::Params),
    DirManage(dir_manage::Params),
    Symlink(symlink::Params),
    Systemd(systemd::Params),
    Patch(patch::Params),
    CertUnbundle(cert_unbundle::Params),
}

impl TaskParams {
    /// Function name the worker dispatches on
    pub const fn function(&self) -> &'static str {
        match self {
            Self::Exec(_) => "exec",
            Self::FileManage(_) => "file_manage",
            Self::FileRemove(_) => "file_remove",
            Self::DirManage(_) => "dir_manage",
            Self::Symlink(_) => "symlink",
            Self::Systemd(_) => "systemd",
            Self::Patch(_) => "patch",
            Self::CertUnbundle(_) => "cert_unbundle",
        }
    }

    /// Call payload: the parameters without the type tag
    pub fn payload(&self) -> Result<Value> {
        let value = match self {
            Self::Exec(p) => serde_json::to_value(p)?,
            Self::FileManage(p) => serde_json::to_value(p)?,
            Self::FileRemove(p) => serde_json::to_value(p)?,
            Self::DirManage(p) => serde_json::to_value(p)?,
            Self::Symlink(p) => serde_json::to_value(p)?,
            Self::Systemd(p) => serde_json::to_value(p)?,
            Self::Patch(p) => serde_json::to_value(p)?,
            Self::CertUnbundle(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Resolve local inputs (role files, default modes) on the driving side
    pub fn prepare(&mut self, role_dir: &Path, config: &Config) -> Result<()> {
        match self {
            Self::FileManage(p) => p.prepare(role_dir, config),
            Self::DirManage(p) => p.prepare(role_dir, config),
            Self::Symlink(p) => p.prepare(role_dir, config),
            Self::Patch(p) => p.prepare(role_dir, config),
            Self::CertUnbundle(p) => p.prepare(role_dir, config),
            Self::Exec(_) | Self::FileRemove(_) | Self::Systemd(_) => Ok(()),
        }
    }
}

/// Registry of every executor a worker serves
pub fn registry() -> rpc::Result<rpc::Registry> {
    let mut registry = rpc::Registry::new();
    registry.register("exec", exec::Executor::default)?;
    registry.register("file_manage", file_manage::Executor::default)?;
    registry.register("file_remove", file_remove::Executor::default)?;
    registry.register("dir_manage", dir_manage::Executor::default)?;
    registry.register("symlink", symlink::Executor::default)?;
    registry.register("systemd", || {
        systemd::Executor::<systemd::SystemctlCommand>::default()
    })?;
    registry.register("patch", patch::Executor::default)?;
    registry.register("cert_unbundle", cert_unbundle::Executor::default)?;
    registry.register(facts::GATHER_FACTS, facts::Executor::default)?;
    Ok(registry)
}

/// Run one task in this process, as `_apply-task` does
pub fn apply_local(registry: &rpc::Registry, params: &TaskParams) -> Result<Output> {
    let value = registry.call(params.function(), params.payload()?)?;
    let mut output = Output::from_value(value)?;
    output.kind = params.function().to_string();
    Ok(output)
}
