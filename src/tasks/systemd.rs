//! `systemd` task: converge a unit's state through `systemctl`
//!
//! Each action first queries the current state and only acts when the unit
//! is not already there.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::output::Output;
use crate::runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
    Mask,
    Unmask,
    DaemonReload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    /// Unit name; not needed for `daemon-reload`
    #[serde(default)]
    pub unit: String,
    pub action: Action,
    #[serde(default)]
    pub dry_run: bool,
}

/// Backend queried and driven by the executor
pub trait Systemctl {
    fn is_active(&self, unit: &str) -> Result<bool>;
    fn is_enabled(&self, unit: &str) -> Result<bool>;
    /// Output of `systemctl is-enabled`, e.g. `masked`
    fn enablement(&self, unit: &str) -> Result<String>;
    fn run(&self, verb: &str, unit: Option<&str>) -> Result<()>;
}

/// The real `systemctl` binary
#[derive(Debug, Default)]
pub struct SystemctlCommand;

impl Systemctl for SystemctlCommand {
    fn is_active(&self, unit: &str) -> Result<bool> {
        Ok(runner::capture(&["systemctl", "is-active", "--quiet", "--", unit])?.success())
    }

    fn is_enabled(&self, unit: &str) -> Result<bool> {
        Ok(runner::capture(&["systemctl", "is-enabled", "--quiet", "--", unit])?.success())
    }

    fn enablement(&self, unit: &str) -> Result<String> {
        let out = runner::capture(&["systemctl", "is-enabled", "--", unit])?;
        Ok(out.stdout.trim().to_string())
    }

    fn run(&self, verb: &str, unit: Option<&str>) -> Result<()> {
        let mut argv = vec!["systemctl", verb];
        if let Some(unit) = unit {
            argv.extend(["--", unit]);
        }
        runner::run_capture(&argv)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Executor<S = SystemctlCommand> {
    systemctl: S,
}

impl<S: Systemctl> rpc::Executor for Executor<S> {
    type Params = Params;
    type Output = Output;

    fn execute(&self, params: Params) -> Result<Output> {
        if params.action != Action::DaemonReload && params.unit.is_empty() {
            anyhow::bail!("`unit` is required for {:?}", params.action);
        }
        let changes = converge(&self.systemctl, &params)?;
        Ok(Output::from_changes([("changes", changes)]))
    }
}

fn converge(ctl: &impl Systemctl, params: &Params) -> Result<Vec<String>> {
    let unit = params.unit.as_str();
    let dry_run = params.dry_run;
    let act = |verb: &str, done: &str| -> Result<Vec<String>> {
        if !dry_run {
            ctl.run(verb, Some(unit))?;
        }
        Ok(vec![format!("{unit}: {done}")])
    };

    match params.action {
        Action::Start if !ctl.is_active(unit)? => act("start", "started"),
        Action::Stop if ctl.is_active(unit)? => act("stop", "stopped"),
        Action::Restart if ctl.is_active(unit)? => act("restart", "restarted"),
        Action::Enable if !ctl.is_enabled(unit)? => act("enable", "enabled"),
        Action::Disable => {
            let mut changes = converge(ctl, &Params { action: Action::Stop, ..params.clone() })?;
            if ctl.is_enabled(unit)? {
                changes.extend(act("disable", "disabled")?);
            }
            Ok(changes)
        }
        Action::Mask => {
            let mut changes = converge(ctl, &Params { action: Action::Stop, ..params.clone() })?;
            if ctl.enablement(unit)? != "masked" {
                changes.extend(act("mask", "masked")?);
            }
            Ok(changes)
        }
        Action::Unmask if ctl.enablement(unit)? == "masked" => act("unmask", "unmasked"),
        Action::DaemonReload => {
            if !dry_run {
                ctl.run("daemon-reload", None)?;
            }
            Ok(vec!["daemon-reload".to_string()])
        }
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc::Executor as _;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeSystemctl {
        active: bool,
        enabled: bool,
        masked: bool,
        calls: RefCell<Vec<String>>,
    }

    impl Systemctl for FakeSystemctl {
        fn is_active(&self, _unit: &str) -> Result<bool> {
            Ok(self.active)
        }

        fn is_enabled(&self, _unit: &str) -> Result<bool> {
            Ok(self.enabled)
        }

        fn enablement(&self, _unit: &str) -> Result<String> {
            Ok(if self.masked { "masked" } else { "disabled" }.to_string())
        }

        fn run(&self, verb: &str, _unit: Option<&str>) -> Result<()> {
            self.calls.borrow_mut().push(verb.to_string());
            Ok(())
        }
    }

    fn run(fake: FakeSystemctl, action: Action, dry_run: bool) -> (Output, Vec<String>) {
        let executor = Executor { systemctl: fake };
        let output = executor
            .execute(Params {
                unit: "nginx.service".to_string(),
                action,
                dry_run,
            })
            .unwrap();
        let calls = executor.systemctl.calls.borrow().clone();
        (output, calls)
    }

    #[test]
    fn test_start_only_when_inactive() {
        let (output, calls) = run(FakeSystemctl::default(), Action::Start, false);
        assert_eq!(output.diff["changes"], vec!["nginx.service: started"]);
        assert_eq!(calls, vec!["start"]);

        let active = FakeSystemctl {
            active: true,
            ..Default::default()
        };
        let (output, calls) = run(active, Action::Start, false);
        assert!(!output.changed);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_disable_stops_first() {
        let fake = FakeSystemctl {
            active: true,
            enabled: true,
            ..Default::default()
        };
        let (output, calls) = run(fake, Action::Disable, false);
        assert_eq!(
            output.diff["changes"],
            vec!["nginx.service: stopped", "nginx.service: disabled"]
        );
        assert_eq!(calls, vec!["stop", "disable"]);
    }

    #[test]
    fn test_mask_and_unmask() {
        let (output, _) = run(FakeSystemctl::default(), Action::Mask, false);
        assert_eq!(output.diff["changes"], vec!["nginx.service: masked"]);

        let masked = FakeSystemctl {
            masked: true,
            ..Default::default()
        };
        let (output, calls) = run(masked, Action::Unmask, false);
        assert_eq!(output.diff["changes"], vec!["nginx.service: unmasked"]);
        assert_eq!(calls, vec!["unmask"]);
    }

    #[test]
    fn test_dry_run_reports_without_calling() {
        let (output, calls) = run(FakeSystemctl::default(), Action::Enable, true);
        assert!(output.changed);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_action_names() {
        let params: Params =
            serde_json::from_value(serde_json::json!({"action": "daemon-reload"})).unwrap();
        assert_eq!(params.action, Action::DaemonReload);
        assert!(serde_json::from_value::<Params>(serde_json::json!({"action": "reboot"})).is_err());
    }

    #[test]
    fn test_unit_required() {
        let executor = Executor {
            systemctl: FakeSystemctl::default(),
        };
        let err = executor
            .execute(Params {
                unit: String::new(),
                action: Action::Start,
                dry_run: false,
            })
            .unwrap_err();
        assert!(err.to_string().contains("unit"));
    }
}
