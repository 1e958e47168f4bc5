//! Hosts and their connectors
//!
//! A [`Host`] is what a blueprint declares. Once its attributes are
//! evaluated it yields a [`Connector`], which knows how to reach the host
//! and start a worker on it.

pub mod local;
pub mod qvm;
pub mod remote;
pub mod ssh;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::process::{Child, Command, Stdio};

use crate::expr;

/// Host name that always refers to the host being applied
pub const THIS: &str = "this";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    Local,
    Ssh,
    Qvm,
}

impl std::fmt::Display for HostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Ssh => write!(f, "ssh"),
            Self::Qvm => write!(f, "qvm"),
        }
    }
}

/// Host and tag selection from the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub hosts: Vec<String>,
    pub tags: Vec<String>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.tags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Host {
    #[serde(rename = "type")]
    pub kind: HostKind,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Unevaluated connector attributes plus `condition`
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
    /// Explicit dependencies plus hosts whose outputs `attrs` read
    #[serde(skip)]
    pub dependencies: Vec<String>,
}

/// Connector attributes once evaluated
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Attrs {
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    #[serde(rename = "become")]
    pub become_user: Option<String>,
}

impl Host {
    pub fn validate(&self) -> Result<()> {
        if self.name == THIS {
            bail!("`{THIS}' is a reserved name");
        }
        if self.name.is_empty() {
            bail!("host name must not be empty");
        }
        Ok(())
    }

    /// Collect dependencies without evaluating anything
    pub fn partial_decode(&mut self) -> Result<()> {
        self.validate()?;

        let mut deps = self.depends_on.clone();
        let referenced = expr::output_hosts(&Value::Object(self.attrs.clone()))
            .with_context(|| format!("{}: invalid expression", self.name))?;
        for host in referenced {
            if !deps.contains(&host) {
                deps.push(host);
            }
        }

        self.dependencies = deps;
        Ok(())
    }

    /// Whether `filter` selects this host
    pub fn matches(&self, filter: &Filter) -> bool {
        if filter.is_empty() {
            return true;
        }
        let by_name = filter.hosts.is_empty() || filter.hosts.contains(&self.name);
        let by_tag =
            filter.tags.is_empty() || self.tags.iter().any(|t| filter.tags.contains(t));
        by_name && by_tag
    }

    /// Value exposed as `host.<name>`
    pub fn value(&self) -> Value {
        json!({
            "name": self.name,
            "type": self.kind.to_string(),
            "tags": self.tags,
        })
    }

    /// Evaluate attributes and build the connector.
    ///
    /// Returns `None` when the host's condition is false.
    pub fn decode(&self, ctx: &Value) -> Result<Option<Box<dyn Connector>>> {
        let evaluated = expr::evaluate(&Value::Object(self.attrs.clone()), ctx)
            .with_context(|| self.name.clone())?;
        let Value::Object(mut attrs) = evaluated else {
            bail!("{}: host attributes are not a table", self.name);
        };

        match attrs.remove("condition") {
            None | Some(Value::Bool(true)) => {}
            Some(Value::Bool(false)) => return Ok(None),
            Some(other) => bail!("{}: condition must be a boolean, got {other}", self.name),
        }

        let attrs: Attrs = serde_json::from_value(Value::Object(attrs))
            .map_err(|e| anyhow!("{}: {e}", self.name))?;
        if self.kind != HostKind::Ssh && (attrs.user.is_some() || attrs.port.is_some()) {
            bail!("{}: `user` and `port` only apply to ssh hosts", self.name);
        }

        let connector: Box<dyn Connector> = match self.kind {
            HostKind::Local => Box::new(local::LocalHost::new(&self.name, attrs)),
            HostKind::Ssh => Box::new(remote::RemoteHost::new(
                &self.name,
                ssh::Ssh::new(&self.name, &attrs),
                attrs.become_user,
            )),
            HostKind::Qvm => Box::new(remote::RemoteHost::new(
                &self.name,
                qvm::Qvm::new(&self.name, &attrs),
                attrs.become_user,
            )),
        };
        Ok(Some(connector))
    }
}

/// How a host is reached and a worker started on it
pub trait Connector: Send {
    fn name(&self) -> &str;

    /// Check reachability and learn what is needed to start a worker
    fn dial(&mut self) -> Result<()>;

    /// Make sure the host runs the same binary as we do
    fn upload_binary(&mut self) -> Result<()>;

    /// Start a worker and connect a controller to it
    fn start(&mut self) -> Result<rpc::Controller>;

    /// Wait for the worker to exit and release the transport
    fn close(&mut self) -> Result<()>;
}

/// Spawn `command` as a worker speaking the protocol on stdin/stdout.
///
/// stderr stays attached to ours for transport diagnostics.
pub fn spawn_worker(label: &str, mut command: Command) -> Result<(Child, rpc::Controller)> {
    log::trace!("{label}: spawning {command:?}");
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("{label}: failed to start worker"))?;

    let stdin = child.stdin.take().context("worker stdin is not piped")?;
    let stdout = child.stdout.take().context("worker stdout is not piped")?;
    let ctrl = rpc::Controller::start(label, stdout, stdin)?;
    Ok((child, ctrl))
}

/// Wait for a worker process and turn a failed exit into an error
pub fn reap(label: &str, child: Option<Child>) -> Result<()> {
    let Some(mut child) = child else {
        return Ok(());
    };
    log::debug!("{label}: waiting for rpc worker...");
    let status = child
        .wait()
        .with_context(|| format!("{label}: failed to wait for worker"))?;
    if !status.success() {
        bail!("{label}: worker exited with {status}");
    }
    Ok(())
}

/// Level passed to a worker's `--level` so it forwards what we would print
pub fn worker_level() -> String {
    log::max_level().to_string().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(toml_src: &str) -> Host {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_deserialize_keeps_connector_attrs() {
        let h = host(
            r#"
            type = "ssh"
            name = "web1"
            tags = ["web"]
            hostname = "10.0.0.5"
            port = 2222
            "#,
        );
        assert_eq!(h.kind, HostKind::Ssh);
        assert_eq!(h.tags, vec!["web"]);
        assert_eq!(h.attrs["hostname"], "10.0.0.5");
        assert_eq!(h.attrs["port"], 2222);
    }

    #[test]
    fn test_reserved_name() {
        let mut h = host("type = \"local\"\nname = \"this\"");
        assert!(h.partial_decode().is_err());
    }

    #[test]
    fn test_partial_decode_merges_declared_and_referenced() {
        let mut h = host(
            r#"
            type = "ssh"
            name = "web1"
            depends_on = ["db"]
            hostname = "${out.dns.bind.zone.type}"
            user = "${out.db.pg.user.type}"
            "#,
        );
        h.partial_decode().unwrap();
        assert_eq!(h.dependencies, vec!["db", "dns"]);
    }

    #[test]
    fn test_filter_semantics() {
        let h = host("type = \"ssh\"\nname = \"web1\"\ntags = [\"web\", \"prod\"]");
        let filter = |hosts: &[&str], tags: &[&str]| Filter {
            hosts: hosts.iter().map(ToString::to_string).collect(),
            tags: tags.iter().map(ToString::to_string).collect(),
        };

        assert!(h.matches(&Filter::default()));
        assert!(h.matches(&filter(&["web1"], &[])));
        assert!(h.matches(&filter(&[], &["prod"])));
        assert!(h.matches(&filter(&["web1"], &["web"])));
        assert!(!h.matches(&filter(&["web1"], &["db"])));
        assert!(!h.matches(&filter(&["web2"], &["web"])));
    }

    #[test]
    fn test_decode_condition_and_attrs() {
        let h = host(
            r#"
            type = "ssh"
            name = "web1"
            condition = "${var.enabled}"
            hostname = "${var.ip}"
            "#,
        );
        let on = h
            .decode(&json!({"var": {"enabled": true, "ip": "10.0.0.5"}}))
            .unwrap();
        assert_eq!(on.unwrap().name(), "web1");

        let off = h
            .decode(&json!({"var": {"enabled": false, "ip": "10.0.0.5"}}))
            .unwrap();
        assert!(off.is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_and_misplaced_attrs() {
        let unknown = host("type = \"local\"\nname = \"a\"\npassword = \"x\"");
        assert!(unknown.decode(&json!({})).is_err());

        let misplaced = host("type = \"qvm\"\nname = \"a\"\nport = 22");
        assert!(misplaced.decode(&json!({})).is_err());
    }

    #[test]
    fn test_value() {
        let h = host("type = \"qvm\"\nname = \"vault\"\ntags = [\"secure\"]");
        assert_eq!(
            h.value(),
            json!({"name": "vault", "type": "qvm", "tags": ["secure"]})
        );
    }
}
