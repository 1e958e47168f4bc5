//! The machine `orch` runs on

use anyhow::{Context, Result};
use std::process::{Child, Command};

use super::{Attrs, Connector, reap, spawn_worker, worker_level};

#[derive(Debug)]
pub struct LocalHost {
    name: String,
    become_user: Option<String>,
    child: Option<Child>,
}

impl LocalHost {
    pub fn new(name: &str, attrs: Attrs) -> Self {
        Self {
            name: name.to_string(),
            become_user: attrs.become_user,
            child: None,
        }
    }

    fn command(&self) -> Result<Command> {
        let exe = std::env::current_exe().context("Could not locate the running executable")?;
        let level = worker_level();

        let mut command = match &self.become_user {
            Some(user) => {
                let mut cmd = Command::new("sudo");
                cmd.args(["-u", user.as_str(), "--"]).arg(&exe);
                cmd
            }
            None => Command::new(&exe),
        };
        command.args(["_rpc", "--level", level.as_str()]);
        Ok(command)
    }
}

impl Connector for LocalHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn dial(&mut self) -> Result<()> {
        Ok(())
    }

    fn upload_binary(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<rpc::Controller> {
        let (child, ctrl) = spawn_worker(&self.name, self.command()?)?;
        self.child = Some(child);
        Ok(ctrl)
    }

    fn close(&mut self) -> Result<()> {
        reap(&self.name, self.child.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_runs_own_executable() {
        let host = LocalHost::new("localhost", Attrs::default());
        let cmd = host.command().unwrap();
        let exe = std::env::current_exe().unwrap();
        assert_eq!(std::path::Path::new(cmd.get_program()), exe.as_path());
        let args = args(&cmd);
        assert_eq!(&args[..2], ["_rpc", "--level"]);
    }

    #[test]
    fn test_become_goes_through_sudo() {
        let attrs = Attrs {
            become_user: Some("root".to_string()),
            ..Attrs::default()
        };
        let host = LocalHost::new("localhost", attrs);
        let cmd = host.command().unwrap();
        assert_eq!(cmd.get_program(), "sudo");
        let args = args(&cmd);
        assert_eq!(&args[..3], ["-u", "root", "--"]);
        assert_eq!(args[4], "_rpc");
    }

    #[test]
    fn test_close_without_start_is_a_no_op() {
        let mut host = LocalHost::new("localhost", Attrs::default());
        host.dial().unwrap();
        host.upload_binary().unwrap();
        host.close().unwrap();
    }
}
