//! Task outputs
//!
//! An [`Output`] is produced by the worker for every applied task and then
//! stamped with the task's identity on the driving side. The accumulated
//! [`Outputs`] of a run feed the `out.*` expression root.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};

/// Category → ordered change descriptions
pub type Diff = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub name: String,
    pub changed: bool,
    #[serde(default)]
    pub diff: Diff,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Output {
    pub fn new(changed: bool) -> Self {
        Self {
            changed,
            ..Self::default()
        }
    }

    /// Output whose `changed` flag is derived from its categories
    pub fn from_changes<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let diff: Diff = categories
            .into_iter()
            .map(|(category, lines)| (category.into(), lines))
            .collect();
        Self {
            changed: diff.values().any(|lines| !lines.is_empty()),
            diff,
            ..Self::default()
        }
    }

    /// Add a diff category
    pub fn with(mut self, category: &str, lines: Vec<String>) -> Self {
        self.diff.insert(category.to_string(), lines);
        self
    }

    /// Decode a worker's return value; an embedded error becomes `Err`
    pub fn from_value(value: Value) -> Result<Self> {
        let output: Self = serde_json::from_value(value)?;
        match output.error.as_deref() {
            Some(err) if !err.is_empty() => anyhow::bail!("{err}"),
            _ => Ok(output),
        }
    }

    /// Fields exposed under `out.<host>.<role>.<task>`
    pub fn value(&self) -> Value {
        json!({
            "type": self.kind,
            "changed": self.changed,
            "diff": self.diff,
        })
    }
}

/// Outputs accumulated over a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outputs(Vec<Output>);

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, output: Output) {
        self.0.push(output);
    }

    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hosts that produced at least one output
    pub fn hosts(&self) -> BTreeSet<String> {
        self.0.iter().map(|o| o.host.clone()).collect()
    }

    /// The `out` tree, with `out.this` aliasing `this_host` when given
    pub fn variables(&self, this_host: Option<&str>) -> Value {
        let mut hosts: Map<String, Value> = Map::new();

        for out in &self.0 {
            let roles = hosts
                .entry(out.host.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(roles) = roles else {
                continue;
            };
            let tasks = roles
                .entry(out.role.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(tasks) = tasks {
                tasks.insert(out.name.clone(), out.value());
            }
        }

        if let Some(this) = this_host {
            let current = hosts
                .get(this)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            hosts.insert("this".to_string(), current);
        }

        Value::Object(hosts)
    }
}

impl IntoIterator for Outputs {
    type Item = Output;
    type IntoIter = std::vec::IntoIter<Output>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Output> for Outputs {
    fn from_iter<T: IntoIterator<Item = Output>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
