//! Qubes OS qubes, reached from another qube with `qvm-run-vm`

use super::Attrs;
use super::remote::Transport;

const QVM_RUN_VM: &str = "/usr/bin/qvm-run-vm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qvm {
    qube: String,
}

impl Qvm {
    pub fn new(name: &str, attrs: &Attrs) -> Self {
        Self {
            qube: attrs.hostname.clone().unwrap_or_else(|| name.to_string()),
        }
    }
}

impl Transport for Qvm {
    fn argv(&self, command: &str) -> Vec<String> {
        vec![
            "/bin/sh".to_string(),
            QVM_RUN_VM.to_string(),
            "--".to_string(),
            self.qube.clone(),
            command.to_string(),
        ]
    }
}
