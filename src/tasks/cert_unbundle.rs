//! `cert_unbundle` task: split a CA bundle into one file per authority
//!
//! Every block of `src` must be a CA certificate. Each is written to
//! `<dst>/<name>.pem`, named after its common name (or its only
//! organizational unit). Anything else in `dst` is removed, so the
//! directory mirrors the bundle exactly.

use anyhow::{Context, Result, anyhow, bail};
use pem::{EncodeConfig, LineEnding, Pem};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::fsutil;
use super::output::Output;
use crate::config::{self, Config};

const CERTIFICATE: &str = "CERTIFICATE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    /// Bundle on the target host
    pub src: PathBuf,
    pub dst: PathBuf,
    #[serde(default)]
    pub file_mode: Option<u32>,
    #[serde(default)]
    pub dir_mode: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
}

impl Params {
    pub fn prepare(&mut self, _role_dir: &Path, config: &Config) -> Result<()> {
        self.file_mode.get_or_insert(config.default_file_mode);
        self.dir_mode.get_or_insert(config.default_dir_mode);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Executor;

impl rpc::Executor for Executor {
    type Params = Params;
    type Output = Output;

    fn execute(&self, params: Params) -> Result<Output> {
        let file_mode = params.file_mode.unwrap_or(config::DEFAULT_FILE_MODE);
        let dir_mode = params.dir_mode.unwrap_or(config::DEFAULT_DIR_MODE);
        let dry_run = params.dry_run;

        let data = fs::read(&params.src)
            .with_context(|| format!("Failed to read {}", params.src.display()))?;
        let certs = unbundle(&data)?;

        let mut changes = fsutil::mkdir_all(&params.dst, dir_mode, dry_run)?;
        let mut seen: Vec<String> = Vec::new();
        for (name, pem) in certs {
            if seen.contains(&name) {
                continue;
            }
            let path = params.dst.join(&name);
            changes.extend(fsutil::write_file(&path, pem.as_bytes(), file_mode, dry_run)?);
            changes.extend(fsutil::chmod(&path, file_mode, dry_run)?);
            seen.push(name);
        }

        let entries = match fs::read_dir(&params.dst) {
            Ok(entries) => entries.collect::<std::io::Result<Vec<_>>>()?,
            Err(e) if dry_run && e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to list {}", params.dst.display()));
            }
        };
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !seen.contains(&name) {
                changes.extend(fsutil::remove(&entry.path(), dry_run)?);
            }
        }

        Ok(Output::from_changes([("certs", changes)]))
    }
}

/// File name and re-encoded PEM of every certificate in a bundle
fn unbundle(data: &[u8]) -> Result<Vec<(String, String)>> {
    let blocks = pem::parse_many(data).context("invalid certificate bundle")?;
    if blocks.is_empty() {
        bail!("invalid certificate bundle: no certificates");
    }

    let mut certs = Vec::with_capacity(blocks.len());
    for block in blocks {
        if block.tag() != CERTIFICATE {
            bail!("invalid certificate: unexpected {} block", block.tag());
        }
        let (_, cert) = X509Certificate::from_der(block.contents())
            .map_err(|e| anyhow!("invalid certificate: {e}"))?;
        if !cert.is_ca() {
            bail!("{} is not a CA", cert.subject());
        }

        let name = file_name(&cert)?;
        let encoded = pem::encode_config(
            &Pem::new(CERTIFICATE, block.contents().to_vec()),
            EncodeConfig::new().set_line_ending(LineEnding::LF),
        );
        certs.push((name, encoded));
    }
    Ok(certs)
}

/// `<common name>.pem`, falling back to a lone organizational unit
fn file_name(cert: &X509Certificate) -> Result<String> {
    let subject = cert.subject();
    let common_name = subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .filter(|cn| !cn.is_empty());

    let name = match common_name {
        Some(cn) => cn.to_string(),
        None => {
            let units: Vec<&str> = subject
                .iter_organizational_unit()
                .filter_map(|ou| ou.as_str().ok())
                .collect();
            match units.as_slice() {
                [unit] => (*unit).to_string(),
                _ => bail!("CA {subject} has no usable name"),
            }
        }
    };

    let name: String = name
        .replace(' ', "_")
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    let valid = Regex::new(r"^[a-zA-Z0-9()._-]+$")?;
    if !valid.is_match(&name) || name.contains("..") {
        bail!("'{name}' is not a valid certificate name");
    }
    Ok(format!("{name}.pem"))
}
