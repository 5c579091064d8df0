//! Service operation: systemd unit enablement and run state via `systemctl`.

use tracing::debug;

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::{Executor, RunOptions};
use crate::plan::{ActionData, Host};

const OP: &str = "service";

/// Thin wrapper over the systemctl binary.
struct SystemCtl;

impl SystemCtl {
    fn available() -> bool {
        which::which("systemctl").is_ok()
    }

    fn probe(executor: &dyn Executor, verb: &str, service: &str) -> Result<bool> {
        let output = executor.run(
            &["systemctl".to_string(), verb.to_string(), service.to_string()],
            &RunOptions::probe(),
        )?;
        Ok(output.success())
    }

    fn act(executor: &dyn Executor, verb: &str, service: &str) -> Result<()> {
        executor.run(
            &["systemctl".to_string(), verb.to_string(), service.to_string()],
            &RunOptions::default(),
        )?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ServiceOperation {
    name: String,
    enabled: Option<bool>,
    state: Option<ServiceState>,
    restart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Running,
    Stopped,
}

impl ServiceOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let name = spec.require_str(OP, "name")?;
        let state = match spec.get_str("state").as_deref() {
            None => None,
            Some("running") => Some(ServiceState::Running),
            Some("stopped") => Some(ServiceState::Stopped),
            Some(other) => {
                return Err(Error::operation_args(
                    OP,
                    format!("state must be 'running' or 'stopped', got '{other}'"),
                ))
            }
        };
        Ok(Self {
            name,
            enabled: spec.get_bool(OP, "enabled")?,
            state,
            restart: spec.get_bool_or(OP, "restart", false)?,
        })
    }
}

impl Operation for ServiceOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        if !SystemCtl::available() {
            return Err(Error::operation_execution(
                OP,
                "systemctl is not available on this host",
            ));
        }

        let mut changes: Vec<&str> = Vec::new();

        if let Some(should_enable) = self.enabled {
            let enabled = SystemCtl::probe(executor, "is-enabled", &self.name)?;
            if should_enable && !enabled {
                debug!(service = %self.name, "enabling unit");
                SystemCtl::act(executor, "enable", &self.name)?;
                changes.push("enabled");
            } else if !should_enable && enabled {
                debug!(service = %self.name, "disabling unit");
                SystemCtl::act(executor, "disable", &self.name)?;
                changes.push("disabled");
            }
        }

        if let Some(desired) = self.state {
            let active = SystemCtl::probe(executor, "is-active", &self.name)?;
            match desired {
                ServiceState::Running if !active => {
                    debug!(service = %self.name, "starting unit");
                    SystemCtl::act(executor, "start", &self.name)?;
                    changes.push("started");
                }
                ServiceState::Stopped if active => {
                    debug!(service = %self.name, "stopping unit");
                    SystemCtl::act(executor, "stop", &self.name)?;
                    changes.push("stopped");
                }
                _ => {}
            }
        }

        if self.restart {
            debug!(service = %self.name, "restarting unit");
            SystemCtl::act(executor, "restart", &self.name)?;
            changes.push("restarted");
        }

        let changed = !changes.is_empty();
        let detail = if changed {
            changes.join(", ")
        } else {
            "noop".to_string()
        };
        Ok(ActionResult::from_change(&host.name, OP, changed, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> ActionData {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn requires_a_name() {
        let err = ServiceOperation::from_spec(&spec(json!({"state": "running"}))).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn rejects_invalid_state() {
        let err = ServiceOperation::from_spec(&spec(json!({
            "name": "nginx",
            "state": "reloaded",
        })))
        .unwrap_err();
        assert!(err.to_string().contains("state"));
    }

    #[test]
    fn parses_full_spec() {
        let op = ServiceOperation::from_spec(&spec(json!({
            "name": "nginx",
            "enabled": "yes",
            "state": "running",
            "restart": true,
        })))
        .unwrap();
        assert_eq!(op.name, "nginx");
        assert_eq!(op.enabled, Some(true));
        assert_eq!(op.state, Some(ServiceState::Running));
        assert!(op.restart);
    }
}
