//! Hosts reached with the system `ssh` client

use super::Attrs;
use super::remote::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ssh {
    hostname: String,
    user: Option<String>,
    port: Option<u16>,
}

impl Ssh {
    /// `hostname` defaults to the host's name
    pub fn new(name: &str, attrs: &Attrs) -> Self {
        Self {
            hostname: attrs.hostname.clone().unwrap_or_else(|| name.to_string()),
            user: attrs.user.clone(),
            port: attrs.port,
        }
    }
}

impl Transport for Ssh {
    fn argv(&self, command: &str) -> Vec<String> {
        let mut argv = vec![
            "ssh".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        if let Some(port) = self.port {
            argv.extend(["-p".to_string(), port.to_string()]);
        }
        if let Some(user) = &self.user {
            argv.extend(["-l".to_string(), user.clone()]);
        }
        argv.extend([
            "--".to_string(),
            self.hostname.clone(),
            command.to_string(),
        ]);
        argv
    }
}
