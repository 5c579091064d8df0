//! Timezone operation: points `/etc/localtime` at a zoneinfo file and
//! optionally keeps `/etc/timezone` in sync.

use std::path::{Path, PathBuf};

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::plan::{ActionData, Host};

const OP: &str = "timezone";

pub struct TimezoneOperation {
    zone: String,
    present: bool,
    localtime_path: PathBuf,
    zoneinfo_dir: PathBuf,
    manage_etc_timezone: bool,
    etc_timezone: PathBuf,
}

impl TimezoneOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let zone = spec
            .get_str("zone")
            .or_else(|| spec.get_str("name"))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::operation_args(OP, "requires a zone"))?;
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
        Ok(Self {
            zone,
            present,
            localtime_path: spec
                .get_path("localtime_path")
                .unwrap_or_else(|| PathBuf::from("/etc/localtime")),
            zoneinfo_dir: spec
                .get_path("zoneinfo_dir")
                .unwrap_or_else(|| PathBuf::from("/usr/share/zoneinfo")),
            manage_etc_timezone: spec.get_bool_or(OP, "manage_etc_timezone", false)?,
            etc_timezone: spec
                .get_path("etc_timezone_path")
                .unwrap_or_else(|| PathBuf::from("/etc/timezone")),
        })
    }

    fn is_current(&self, target: &Path) -> bool {
        if self.localtime_path.is_symlink() {
            return std::fs::read_link(&self.localtime_path)
                .map(|link| link == target)
                .unwrap_or(false);
        }
        if !self.localtime_path.exists() {
            return false;
        }
        // Not a symlink: compare the file bytes against the zone file.
        match (
            std::fs::read(&self.localtime_path),
            std::fs::read(target),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn apply_absent(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        let mut details = Vec::new();
        if executor.remove_path(&self.localtime_path)? {
            details.push("localtime");
        }
        if self.manage_etc_timezone && executor.remove_path(&self.etc_timezone)? {
            details.push("etc_timezone");
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

impl Operation for TimezoneOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        if !self.present {
            return self.apply_absent(host, executor);
        }

        let target = self.zoneinfo_dir.join(&self.zone);
        if !target.exists() {
            return Err(Error::operation_execution(
                OP,
                format!("zone file '{}' does not exist", target.display()),
            ));
        }

        let mut details = Vec::new();

        if !self.is_current(&target) {
            details.push(format!("zone->{}", self.zone));
            if !executor.dry_run() {
                if let Some(parent) = self.localtime_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                executor.remove_path(&self.localtime_path)?;
                std::os::unix::fs::symlink(&target, &self.localtime_path)?;
            }
        }

        if self.manage_etc_timezone {
            let change =
                executor.write_file(&self.etc_timezone, &format!("{}\n", self.zone), None)?;
            if change.changed {
                details.push("etc_timezone".to_string());
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
    use crate::executor::LocalExecutor;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> ActionData {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn zone_falls_back_to_name() {
        let op = TimezoneOperation::from_spec(&spec(json!({"name": "UTC"}))).unwrap();
        assert_eq!(op.zone, "UTC");
        assert!(TimezoneOperation::from_spec(&spec(json!({}))).is_err());
    }

    #[test]
    fn links_and_settles() {
        let dir = tempfile::tempdir().unwrap();
        let zoneinfo = dir.path().join("zoneinfo");
        std::fs::create_dir_all(zoneinfo.join("Europe")).unwrap();
        std::fs::write(zoneinfo.join("Europe/Berlin"), "TZif2").unwrap();
        let localtime = dir.path().join("localtime");

        let op = TimezoneOperation::from_spec(&spec(json!({
            "zone": "Europe/Berlin",
            "localtime_path": localtime.to_str().unwrap(),
            "zoneinfo_dir": zoneinfo.to_str().unwrap(),
        })))
        .unwrap();
        let host = Host::new("local");
        let executor = LocalExecutor::new(false);

        let result = op.apply(&host, &executor).unwrap();
        assert!(result.changed);
        assert_eq!(result.details, "zone->Europe/Berlin");
        assert!(localtime.is_symlink());

        let result = op.apply(&host, &executor).unwrap();
        assert!(!result.changed);
    }

    #[test]
    fn missing_zone_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let op = TimezoneOperation::from_spec(&spec(json!({
            "zone": "Mars/Olympus",
            "zoneinfo_dir": dir.path().to_str().unwrap(),
            "localtime_path": dir.path().join("localtime").to_str().unwrap(),
        })))
        .unwrap();
        let err = op
            .apply(&Host::new("local"), &LocalExecutor::new(false))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn absent_removes_managed_files() {
        let dir = tempfile::tempdir().unwrap();
        let localtime = dir.path().join("localtime");
        let etc_timezone = dir.path().join("timezone");
        std::fs::write(&localtime, "TZif2").unwrap();
        std::fs::write(&etc_timezone, "UTC\n").unwrap();

        let op = TimezoneOperation::from_spec(&spec(json!({
            "zone": "UTC",
            "state": "absent",
            "localtime_path": localtime.to_str().unwrap(),
            "etc_timezone_path": etc_timezone.to_str().unwrap(),
            "manage_etc_timezone": true,
        })))
        .unwrap();
        let result = op
            .apply(&Host::new("local"), &LocalExecutor::new(false))
            .unwrap();
        assert!(result.changed);
        assert_eq!(result.details, "localtime, etc_timezone");
        assert!(!localtime.exists());
        assert!(!etc_timezone.exists());
    }
}
