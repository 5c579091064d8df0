//! Cron operation: one scheduled job per drop-in file under `/etc/cron.d`.

use std::path::PathBuf;

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::plan::{ActionData, Host};

const OP: &str = "cron";
const DEFAULT_CRON_DIR: &str = "/etc/cron.d";

pub struct CronOperation {
    user: String,
    command: String,
    minute: String,
    hour: String,
    day: String,
    month: String,
    weekday: String,
    env: ActionData,
    present: bool,
    cron_file: PathBuf,
}

impl CronOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let name = spec.require_str(OP, "name")?;
        let command = spec.require_str(OP, "command")?;
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
        let field = |key: &str, alias: Option<&str>| {
            spec.get_str(key)
                .or_else(|| alias.and_then(|a| spec.get_str(a)))
                .unwrap_or_else(|| "*".to_string())
        };
        let cron_dir = spec
            .get_path("cron_dir")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CRON_DIR));
        Ok(Self {
            user: spec.get_str("user").unwrap_or_else(|| "root".to_string()),
            command,
            minute: field("minute", None),
            hour: field("hour", None),
            day: field("day", Some("day_of_month")),
            month: field("month", None),
            weekday: field("weekday", Some("day_of_week")),
            env: spec.get_map(OP, "env")?.unwrap_or_default(),
            present,
            cron_file: cron_dir.join(format!("{name}.cron")),
        })
    }

    fn render(&self) -> String {
        let mut lines = Vec::new();
        // Map iteration is sorted by key, so the rendered file is stable.
        for (key, value) in &self.env {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lines.push(format!("{key}={value}"));
        }
        lines.push(format!(
            "{} {} {} {} {} {} {}",
            self.minute, self.hour, self.day, self.month, self.weekday, self.user, self.command
        ));
        lines.join("\n") + "\n"
    }
}

impl Operation for CronOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        if !self.present {
            let removed = executor.remove_path(&self.cron_file)?;
            let detail = if removed { "removed" } else { "noop" };
            return Ok(ActionResult::from_change(&host.name, OP, removed, detail));
        }

        let content = self.render();
        let existing = executor.read_file(&self.cron_file)?;
        if existing.as_deref() == Some(content.as_str()) {
            return Ok(ActionResult::ok(&host.name, OP, "noop"));
        }
        let change = executor.write_file(&self.cron_file, &content, Some(0o644))?;
        let detail = if existing.is_some() {
            "updated"
        } else {
            "created"
        };
        Ok(ActionResult::from_change(
            &host.name,
            OP,
            change.changed,
            detail,
        ))
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
    fn requires_name_and_command() {
        assert!(CronOperation::from_spec(&spec(json!({"name": "backup"}))).is_err());
        assert!(CronOperation::from_spec(&spec(json!({"command": "true"}))).is_err());
    }

    #[test]
    fn renders_schedule_env_and_command() {
        let op = CronOperation::from_spec(&spec(json!({
            "name": "backup",
            "command": "/usr/local/bin/backup.sh",
            "minute": "15",
            "hour": "3",
            "user": "backup",
            "env": {"PATH": "/usr/bin", "MAILTO": "ops@example.com"},
        })))
        .unwrap();
        assert_eq!(
            op.render(),
            "MAILTO=ops@example.com\nPATH=/usr/bin\n15 3 * * * backup /usr/local/bin/backup.sh\n"
        );
    }

    #[test]
    fn creates_updates_and_settles() {
        let dir = tempfile::tempdir().unwrap();
        let op = CronOperation::from_spec(&spec(json!({
            "name": "tidy",
            "command": "find /tmp -mtime +7 -delete",
            "hour": "4",
            "cron_dir": dir.path().to_str().unwrap(),
        })))
        .unwrap();
        let host = Host::new("local");
        let executor = LocalExecutor::new(false);

        let result = op.apply(&host, &executor).unwrap();
        assert!(result.changed);
        assert_eq!(result.details, "created");

        let result = op.apply(&host, &executor).unwrap();
        assert!(!result.changed);

        std::fs::write(dir.path().join("tidy.cron"), "drifted\n").unwrap();
        let result = op.apply(&host, &executor).unwrap();
        assert!(result.changed);
        assert_eq!(result.details, "updated");
    }

    #[test]
    fn absent_removes_the_drop_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidy.cron");
        std::fs::write(&path, "x\n").unwrap();
        let op = CronOperation::from_spec(&spec(json!({
            "name": "tidy",
            "command": "true",
            "state": "absent",
            "cron_dir": dir.path().to_str().unwrap(),
        })))
        .unwrap();
        let result = op
            .apply(&Host::new("local"), &LocalExecutor::new(false))
            .unwrap();
        assert!(result.changed);
        assert!(!path.exists());
    }
}
