//! Sysctl operation: kernel parameters applied at runtime and persisted as
//! drop-ins under `/etc/sysctl.d`.

use std::path::PathBuf;

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::{Executor, RunOptions};
use crate::plan::{ActionData, Host};

const OP: &str = "sysctl";

#[derive(Debug)]
pub struct SysctlOperation {
    name: String,
    value: String,
    present: bool,
    persist: bool,
    apply_runtime: bool,
    conf_file: PathBuf,
}

impl SysctlOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let name = spec.require_str(OP, "name")?;
        if name.contains('=') {
            return Err(Error::operation_args(OP, "name should not contain '='"));
        }
        let present = match spec.get_str("state").as_deref() {
            None | Some("present") => true,
            Some("absent") => false,
            Some(other) => {
                return Err(Error::operation_args(
                    OP,
                    format!("state must be 'present' or 'absent', got '{other}'"),
                ))
            }
        };
        let value = match spec.get_str("value") {
            Some(v) => v,
            None if !present => String::new(),
            None => return Err(Error::operation_args(OP, "requires a value")),
        };
        let conf_file = spec.get_path("conf_file").unwrap_or_else(|| {
            PathBuf::from(format!("/etc/sysctl.d/{}.conf", name.replace('.', "_")))
        });
        Ok(Self {
            name,
            value,
            present,
            persist: spec.get_bool_or(OP, "persist", true)?,
            apply_runtime: spec.get_bool_or(OP, "apply_runtime", true)?,
            conf_file,
        })
    }
}

impl Operation for SysctlOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        if !self.present {
            let removed = executor.remove_path(&self.conf_file)?;
            let detail = if removed { "removed" } else { "noop" };
            return Ok(ActionResult::from_change(&host.name, OP, removed, detail));
        }

        let mut details = Vec::new();

        if self.apply_runtime {
            executor.run(
                &[
                    "sysctl".to_string(),
                    "-w".to_string(),
                    format!("{}={}", self.name, self.value),
                ],
                &RunOptions::default(),
            )?;
            details.push("runtime");
        }

        if self.persist {
            let content = format!("{} = {}\n", self.name, self.value);
            let change = executor.write_file(&self.conf_file, &content, None)?;
            if change.changed {
                details.push("persist");
            }
        }

        let changed = !details.is_empty();
        let detail = if changed {
            details.join(", ")
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
    fn requires_name_and_value() {
        assert!(SysctlOperation::from_spec(&spec(json!({"value": "1"}))).is_err());
        assert!(
            SysctlOperation::from_spec(&spec(json!({"name": "net.ipv4.ip_forward"}))).is_err()
        );
    }

    #[test]
    fn rejects_assignment_in_name() {
        let err = SysctlOperation::from_spec(&spec(json!({
            "name": "net.ipv4.ip_forward=1",
            "value": "1",
        })))
        .unwrap_err();
        assert!(err.to_string().contains("'='"));
    }

    #[test]
    fn conf_file_derives_from_dotted_name() {
        let op = SysctlOperation::from_spec(&spec(json!({
            "name": "net.ipv4.ip_forward",
            "value": "1",
        })))
        .unwrap();
        assert_eq!(
            op.conf_file,
            PathBuf::from("/etc/sysctl.d/net_ipv4_ip_forward.conf")
        );
    }

    #[test]
    fn absent_needs_no_value() {
        let op = SysctlOperation::from_spec(&spec(json!({
            "name": "vm.swappiness",
            "state": "absent",
        })))
        .unwrap();
        assert!(!op.present);
    }

    #[test]
    fn persist_only_writes_drop_in() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("vm_swappiness.conf");
        let op = SysctlOperation::from_spec(&spec(json!({
            "name": "vm.swappiness",
            "value": "10",
            "apply_runtime": false,
            "conf_file": conf.to_str().unwrap(),
        })))
        .unwrap();
        let host = Host::new("local");
        let executor = crate::executor::LocalExecutor::new(false);

        let result = op.apply(&host, &executor).unwrap();
        assert!(result.changed);
        assert_eq!(result.details, "persist");
        assert_eq!(
            std::fs::read_to_string(&conf).unwrap(),
            "vm.swappiness = 10\n"
        );

        let result = op.apply(&host, &executor).unwrap();
        assert!(!result.changed);
    }
}
