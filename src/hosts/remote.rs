//! Hosts reached through a command transport (ssh, qvm)
//!
//! A transport only knows how to run one shell command on the far side.
//! Everything else (probing the system, keeping the uploaded binary
//! current, starting the worker) is shared here.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use super::{Connector, reap, spawn_worker, worker_level};
use crate::paths;
use crate::runner::{self, Captured, shell_quote};

/// Runs shell commands on a remote system
pub trait Transport: Send {
    /// Full local argv that runs `command` through the remote shell
    fn argv(&self, command: &str) -> Vec<String>;
}

/// BLAKE3 of the running executable, as printed by `_checksum`
pub fn binary_checksum() -> Result<String> {
    let exe = std::env::current_exe().context("Could not locate the running executable")?;
    let data = fs::read(&exe).with_context(|| format!("Could not read {}", exe.display()))?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SysInfo {
    os: String,
    arch: String,
    home: String,
}

/// Normalize `uname -s -m` output to Rust's target names
fn parse_uname(output: &str) -> Result<(String, String)> {
    let fields: Vec<&str> = output.split_whitespace().collect();
    let [os, arch] = fields.as_slice() else {
        bail!("invalid uname output: {output:?}");
    };

    let os = match os.to_lowercase().as_str() {
        "darwin" => "macos".to_string(),
        other => other.to_string(),
    };
    let arch = match *arch {
        "amd64" => "x86_64",
        "arm64" => "aarch64",
        other => other,
    };
    Ok((os, arch.to_string()))
}

#[derive(Debug)]
pub struct RemoteHost<T> {
    name: String,
    transport: T,
    become_user: Option<String>,
    bin: Option<PathBuf>,
    child: Option<Child>,
}

impl<T: Transport> RemoteHost<T> {
    pub fn new(name: &str, transport: T, become_user: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            transport,
            become_user,
            bin: None,
            child: None,
        }
    }

    /// Local argv running `command` remotely, as `become` when set
    fn argv(&self, command: &str) -> Vec<String> {
        let command = match &self.become_user {
            Some(user) => format!(
                "sudo -H -u {} -- sh -c {}",
                shell_quote(user),
                shell_quote(command)
            ),
            None => command.to_string(),
        };
        self.transport.argv(&command)
    }

    fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<Captured> {
        log::trace!("{}: exec: {command}", self.name);
        runner::capture_with_stdin(&self.argv(command), stdin)
    }

    fn bin(&self) -> Result<&Path> {
        self.bin
            .as_deref()
            .with_context(|| format!("{}: not dialed", self.name))
    }

    fn sysinfo(&self) -> Result<SysInfo> {
        let uname = self.run("uname -s -m", None)?.check("uname")?;
        let (os, arch) = parse_uname(&uname.stdout)?;
        let home = self.run("printenv HOME", None)?.check("printenv HOME")?;
        Ok(SysInfo {
            os,
            arch,
            home: home.stdout.trim().to_string(),
        })
    }
}

impl<T: Transport> Connector for RemoteHost<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn dial(&mut self) -> Result<()> {
        let info = self
            .sysinfo()
            .with_context(|| format!("{}: failed to connect", self.name))?;
        log::debug!(
            "{}: os={}, arch={}, home={}",
            self.name,
            info.os,
            info.arch,
            info.home
        );

        let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
        if info.os != os || info.arch != arch {
            bail!(
                "{}: remote is {}/{} but this binary is built for {os}/{arch}",
                self.name,
                info.os,
                info.arch
            );
        }
        if info.home.is_empty() {
            bail!("{}: HOME is not set", self.name);
        }

        self.bin = Some(paths::remote_bin(&info.home));
        Ok(())
    }

    fn upload_binary(&mut self) -> Result<()> {
        let path = self.bin()?;
        let bin = shell_quote(&path.to_string_lossy());
        let local = binary_checksum()?;
        log::trace!("{}: local blake3={local}", self.name);

        let remote = self.run(&format!("{bin} _checksum"), None)?;
        if remote.success() && remote.stdout.trim() == local {
            log::debug!("{}: using cached {}", self.name, path.display());
            return Ok(());
        }

        log::info!("{}: uploading binary to {}", self.name, path.display());
        let exe = std::env::current_exe().context("Could not locate the running executable")?;
        let data = fs::read(&exe).with_context(|| format!("Could not read {}", exe.display()))?;

        let tmp = shell_quote(&format!("{}.tmp", path.to_string_lossy()));
        let dir = shell_quote(&path.parent().unwrap_or(Path::new(".")).to_string_lossy());
        let script = format!(
            "umask 077 && mkdir -p -- {dir} && cat > {tmp} && chmod 0700 -- {tmp} && mv -f -- {tmp} {bin}"
        );
        self.run(&script, Some(&data))?
            .check(&format!("{}: upload", self.name))?;
        Ok(())
    }

    fn start(&mut self) -> Result<rpc::Controller> {
        let bin = shell_quote(&self.bin()?.to_string_lossy());
        let command = format!("{bin} _rpc --level {}", worker_level());
        let argv = self.argv(&command);
        let (program, args) = argv.split_first().context("empty transport command")?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        let (child, ctrl) = spawn_worker(&self.name, cmd)?;
        self.child = Some(child);
        Ok(ctrl)
    }

    fn close(&mut self) -> Result<()> {
        reap(&self.name, self.child.take())
    }
}
