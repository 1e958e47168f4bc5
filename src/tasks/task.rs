//! Task lifecycle: declared → partially decoded → decoded → applied
//!
//! A [`Task`] is what a role file declares. Partial decoding only looks at
//! the unresolved body to find which hosts' outputs it reads. Decoding
//! evaluates the body against a host's context and yields a
//! [`DecodedTask`], which is applied through that host's controller.

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use super::output::Output;
use super::{TYPES, TaskParams};
use crate::config::Config;
use crate::expr;

/// Attributes the lifecycle owns; a task body may not set them itself
const RESERVED: &[&str] = &["dry_run"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    /// Unevaluated, type-specific attributes plus `condition`
    #[serde(flatten)]
    pub body: Map<String, Value>,
    /// Hosts whose outputs the body reads
    #[serde(skip)]
    pub dependencies: Vec<String>,
}

impl Task {
    /// Validate the type and collect `out.<host>` references
    pub fn partial_decode(&mut self) -> Result<()> {
        if !TYPES.contains(&self.kind.as_str()) {
            bail!("{}: unknown task type {:?}", self.name, self.kind);
        }
        if let Some(key) = RESERVED.iter().find(|k| self.body.contains_key(**k)) {
            bail!("{}: {key} is reserved", self.name);
        }

        self.dependencies = expr::output_hosts(&Value::Object(self.body.clone()))
            .with_context(|| format!("{}: invalid expression", self.name))?;
        Ok(())
    }

    /// Evaluate the body against `ctx`.
    ///
    /// Returns `None` when the task's condition is false.
    pub fn decode(
        &self,
        ctx: &Value,
        host: &str,
        role: &str,
        role_dir: &Path,
        config: &Config,
    ) -> Result<Option<DecodedTask>> {
        let label = format!("{host}: {role}.{}", self.name);

        let evaluated = expr::evaluate(&Value::Object(self.body.clone()), ctx)
            .with_context(|| label.clone())?;
        let Value::Object(mut body) = evaluated else {
            bail!("{label}: task body is not a table");
        };

        match body.remove("condition") {
            None | Some(Value::Bool(true)) => {}
            Some(Value::Bool(false)) => {
                log::debug!("{label}: condition is false, skipping");
                return Ok(None);
            }
            Some(other) => bail!("{label}: condition must be a boolean, got {other}"),
        }

        body.insert("type".to_string(), Value::String(self.kind.clone()));
        body.insert("dry_run".to_string(), Value::Bool(config.dry_run));

        let mut params: TaskParams = serde_json::from_value(Value::Object(body))
            .map_err(|e| anyhow!("{label}: {e}"))?;
        params
            .prepare(role_dir, config)
            .with_context(|| label.clone())?;

        Ok(Some(DecodedTask {
            host: host.to_string(),
            role: role.to_string(),
            name: self.name.clone(),
            params,
        }))
    }
}

/// A task with concrete parameters, bound to a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTask {
    pub host: String,
    pub role: String,
    pub name: String,
    pub params: TaskParams,
}

impl DecodedTask {
    pub fn label(&self) -> String {
        format!("{}: {}.{}", self.host, self.role, self.name)
    }

    /// Run the task on the worker behind `ctrl`
    pub fn apply(&self, ctrl: &mut rpc::Controller) -> Result<Output> {
        self.call(ctrl).map_err(|e| anyhow!("{}: {e:#}", self.label()))
    }

    fn call(&self, ctrl: &mut rpc::Controller) -> Result<Output> {
        let value = ctrl.call(self.params.function(), self.params.payload()?)?;
        let mut output = Output::from_value(value)?;
        output.kind = self.params.function().to_string();
        output.host.clone_from(&self.host);
        output.role.clone_from(&self.role);
        output.name.clone_from(&self.name);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::{self, JoinHandle};

    fn task(kind: &str, body: Value) -> Task {
        let Value::Object(body) = body else {
            panic!("body must be an object");
        };
        Task {
            kind: kind.to_string(),
            name: "t".to_string(),
            body,
            dependencies: Vec::new(),
        }
    }

    fn decode(task: &Task, ctx: &Value) -> Result<Option<DecodedTask>> {
        task.decode(ctx, "web1", "base", Path::new("."), &Config::default())
    }

    /// Controller connected to an in-process worker serving every task type
    fn session() -> (rpc::Controller, JoinHandle<rpc::Result<()>>) {
        let (to_worker_r, to_worker_w) = std::io::pipe().unwrap();
        let (to_ctrl_r, to_ctrl_w) = std::io::pipe().unwrap();

        let worker = thread::spawn(move || {
            let registry = super::super::registry()?;
            rpc::Worker::new(to_worker_r, rpc::Sink::new(to_ctrl_w), &registry).run()
        });
        let ctrl = rpc::Controller::start("web1", to_ctrl_r, to_worker_w).unwrap();
        (ctrl, worker)
    }

    #[test]
    fn test_partial_decode_collects_output_hosts() {
        let mut t = task(
            "exec",
            json!({
                "cmd": "echo ${out.db.postgres.init.changed} ${out.this.base.x.changed}",
                "condition": "${out.cache.redis.install.changed}",
            }),
        );
        t.partial_decode().unwrap();
        let mut deps = t.dependencies.clone();
        deps.sort();
        assert_eq!(deps, vec!["cache", "db"]);
    }

    #[test]
    fn test_partial_decode_rejects_unknown_type() {
        let mut t = task("reboot", json!({}));
        let err = t.partial_decode().unwrap_err();
        assert!(err.to_string().contains("unknown task type"));
    }

    #[test]
    fn test_partial_decode_rejects_reserved_attribute() {
        let mut t = task("exec", json!({"cmd": "true", "dry_run": true}));
        assert!(t.partial_decode().is_err());
    }

    #[test]
    fn test_decode_evaluates_against_context() {
        let t = task("exec", json!({"cmd": "echo ${var.greeting}"}));
        let ctx = json!({"var": {"greeting": "hello"}});
        let decoded = decode(&t, &ctx).unwrap().unwrap();

        let TaskParams::Exec(params) = &decoded.params else {
            panic!("expected exec params");
        };
        assert_eq!(params.cmd, "echo hello");
        assert_eq!(decoded.label(), "web1: base.t");
    }

    #[test]
    fn test_false_condition_skips() {
        let t = task("exec", json!({"cmd": "true", "condition": "${fact.is_qvm}"}));
        let ctx = json!({"fact": {"is_qvm": false}});
        assert!(decode(&t, &ctx).unwrap().is_none());

        let bad = task("exec", json!({"cmd": "true", "condition": "yes"}));
        assert!(decode(&bad, &ctx).is_err());
    }

    #[test]
    fn test_decode_error_names_the_task() {
        let t = task("exec", json!({"command": "true"}));
        let err = decode(&t, &json!({})).unwrap_err();
        assert!(err.to_string().starts_with("web1: base.t: "), "{err}");
    }

    #[test]
    fn test_dry_run_travels_with_params() {
        let t = task("file_remove", json!({"path": "/tmp/x"}));
        let config = Config {
            dry_run: true,
            ..Config::default()
        };
        let decoded = t
            .decode(&json!({}), "h", "r", Path::new("."), &config)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.params.payload().unwrap()["dry_run"], json!(true));
    }

    #[test]
    fn test_apply_exec_over_rpc() {
        let t = task("exec", json!({"cmd": "echo hi"}));
        let decoded = decode(&t, &json!({})).unwrap().unwrap();

        let (mut ctrl, worker) = session();
        let output = decoded.apply(&mut ctrl).unwrap();
        ctrl.close().unwrap();
        worker.join().unwrap().unwrap();

        assert!(output.changed);
        assert_eq!(output.diff["stdout"], vec!["hi"]);
        assert_eq!(
            (output.kind.as_str(), output.host.as_str(), output.role.as_str()),
            ("exec", "web1", "base")
        );
        assert_eq!(output.name, "t");
    }

    #[test]
    fn test_apply_failure_is_wrapped() {
        let t = task("exec", json!({"cmd": "false"}));
        let decoded = decode(&t, &json!({})).unwrap().unwrap();

        let (mut ctrl, worker) = session();
        let err = decoded.apply(&mut ctrl).unwrap_err();
        ctrl.close().unwrap();
        worker.join().unwrap().unwrap();

        assert!(err.to_string().starts_with("web1: base.t: false failed"), "{err}");
    }
}
