//! Facts about the host a worker runs on, exposed as `fact.*`

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::runner;

/// Function name of the facts executor
pub const GATHER_FACTS: &str = "gather_facts";

const OS_RELEASE: &str = "/etc/os-release";
const QUBES_DIR: &str = "/var/run/qubes";
const QREXEC_AGENT: &str = "/var/run/qubes/qrexec-agent";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    pub name: String,
    pub version: String,
    pub codename: String,
}

impl OsRelease {
    /// Parse `os-release` content; only `ID`, `VERSION_ID` and
    /// `VERSION_CODENAME` are kept
    pub fn parse(data: &str) -> Result<Self> {
        let rx = Regex::new(r#"^([A-Z_]+)="?([^"$]*)"?$"#)?;
        let mut os = Self::default();

        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(caps) = rx.captures(line) else {
                bail!("unparseable os-release line: {line}");
            };

            let value = caps[2].to_string();
            match &caps[1] {
                "ID" => os.name = value,
                "VERSION_ID" => os.version = value,
                "VERSION_CODENAME" => os.codename = value,
                _ => log::trace!("skipping os-release line: {line}"),
            }
        }

        Ok(os)
    }

    fn gather() -> Result<Self> {
        let data = fs::read_to_string(OS_RELEASE)
            .with_context(|| format!("Could not read {OS_RELEASE}"))?;
        Self::parse(&data)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facts {
    pub hostname: String,
    pub os: OsRelease,
    pub arch: String,
    pub user: String,
    pub is_qvm: bool,
}

impl Facts {
    pub fn gather() -> Result<Self> {
        Ok(Self {
            hostname: hostname()?,
            os: OsRelease::gather()?,
            arch: std::env::consts::ARCH.to_string(),
            user: user()?,
            is_qvm: Path::new(QUBES_DIR).is_dir() && Path::new(QREXEC_AGENT).exists(),
        })
    }
}

pub fn hostname() -> Result<String> {
    match fs::read_to_string("/proc/sys/kernel/hostname") {
        Ok(name) => Ok(name.trim().to_string()),
        Err(_) => runner::run_capture(&["uname", "-n"]),
    }
}

fn user() -> Result<String> {
    match std::env::var("USER") {
        Ok(user) if !user.is_empty() => Ok(user),
        _ => runner::run_capture(&["id", "-un"]),
    }
}

/// `gather_facts` takes no parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Params {}

#[derive(Debug, Default)]
pub struct Executor;

impl rpc::Executor for Executor {
    type Params = Params;
    type Output = Facts;

    fn execute(&self, _params: Params) -> Result<Facts> {
        let facts = Facts::gather()?;
        log::debug!("gathered facts for {}", facts.hostname);
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBIAN: &str = r#"PRETTY_NAME="Debian GNU/Linux 12 (bookworm)"
NAME="Debian GNU/Linux"
VERSION_ID="12"
VERSION="12 (bookworm)"
VERSION_CODENAME=bookworm
ID=debian
HOME_URL="https://www.debian.org/"
"#;

    #[test]
    fn test_parse_os_release() {
        let os = OsRelease::parse(DEBIAN).unwrap();
        assert_eq!(
            os,
            OsRelease {
                name: "debian".to_string(),
                version: "12".to_string(),
                codename: "bookworm".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_skips_blank_and_comment_lines() {
        let os = OsRelease::parse("# generated\n\nID=fedora\n").unwrap();
        assert_eq!(os.name, "fedora");
        assert!(os.codename.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = OsRelease::parse("ID=arch\nnot a key value\n").unwrap_err();
        assert!(err.to_string().contains("not a key value"));
    }

    #[test]
    fn test_params_accept_empty_object() {
        serde_json::from_value::<Params>(serde_json::json!({})).unwrap();
    }
}
