//! `file_remove` task

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::fsutil;
use super::output::Output;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub path: PathBuf,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct Executor;

impl rpc::Executor for Executor {
    type Params = Params;
    type Output = Output;

    fn execute(&self, params: Params) -> Result<Output> {
        let removed = fsutil::remove(&params.path, params.dry_run)?;
        Ok(Output::from_changes([("remove", removed)]))
    }
}
