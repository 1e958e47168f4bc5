//! Entry points the driving side starts on a target host
//!
//! None of these print anything meant for a person. `_rpc` owns stdout for
//! protocol frames; the others print a single JSON document or hash.

use anyhow::{Context, Result};
use log::LevelFilter;
use std::io::{self, Read};
use std::panic;

use crate::hosts::remote::binary_checksum;
use crate::tasks::facts::{self, Facts};
use crate::tasks::{self, Output, TaskParams};

/// Serve function calls on stdin/stdout until the controller says exit
pub fn rpc(level: LevelFilter) -> Result<()> {
    let sink = rpc::Sink::new(io::stdout());

    let hostname = facts::hostname().unwrap_or_else(|_| "worker".to_string());
    rpc::RpcLogger::new(sink.clone(), level, format!("{hostname}: "))
        .install()
        .context("Could not install the worker logger")?;

    // A panic message on stderr would be lost; stdout belongs to frames.
    panic::set_hook(Box::new(|info| log::error!("{info}")));

    let registry = tasks::registry()?;
    log::debug!(
        "serving {}",
        registry.names().collect::<Vec<_>>().join(", ")
    );
    rpc::Worker::new(io::stdin(), sink, &registry)
        .run()
        .context("worker session failed")?;
    Ok(())
}

pub fn gather_facts() -> Result<()> {
    let facts = Facts::gather()?;
    println!("{}", serde_json::to_string_pretty(&facts)?);
    Ok(())
}

pub fn apply_task() -> Result<()> {
    let output = apply_task_from(io::stdin())?;
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn apply_task_from(mut reader: impl Read) -> Result<Output> {
    let mut input = String::new();
    reader
        .read_to_string(&mut input)
        .context("Could not read task from stdin")?;
    let params: TaskParams = serde_json::from_str(&input).context("Invalid task")?;

    let registry = tasks::registry()?;
    tasks::apply_local(&registry, &params)
}

pub fn checksum() -> Result<()> {
    println!("{}", binary_checksum()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_apply_task_from_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stale");
        fs::write(&path, "x").unwrap();

        let input = serde_json::json!({
            "type": "file_remove",
            "path": path,
        })
        .to_string();
        let output = apply_task_from(input.as_bytes()).unwrap();

        assert_eq!(output.kind, "file_remove");
        assert!(output.changed);
        assert!(!path.exists());
    }

    #[test]
    fn test_apply_task_rejects_unknown_type() {
        let err = apply_task_from(r#"{"type": "reboot"}"#.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Invalid task"));
    }
}
