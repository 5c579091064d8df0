//! Yum repository operation: renders repo stanzas under `/etc/yum.repos.d`.

use std::path::PathBuf;

use serde_json::Value;

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::plan::{ActionData, Host};

const OP: &str = "yum_repo";

#[derive(Debug)]
pub struct YumRepoOperation {
    name: String,
    present: bool,
    baseurl: Option<String>,
    mirrorlist: Option<String>,
    enabled: bool,
    gpgcheck: bool,
    repo_gpgcheck: Option<bool>,
    gpgkey: Option<String>,
    description: String,
    metadata_expire: Option<String>,
    options: ActionData,
    path: PathBuf,
    mode: u32,
}

impl YumRepoOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let name = ["name", "id", "repoid", "repository"]
            .into_iter()
            .find_map(|key| spec.get_str(key))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::operation_args(OP, "requires a name"))?;
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
        let baseurl = spec.get_str("baseurl");
        let mirrorlist = spec.get_str("mirrorlist");
        if present && baseurl.is_none() && mirrorlist.is_none() {
            return Err(Error::operation_args(
                OP,
                "requires a baseurl or mirrorlist when state=present",
            ));
        }
        Ok(Self {
            present,
            baseurl,
            mirrorlist,
            enabled: spec.get_bool_or(OP, "enabled", true)?,
            gpgcheck: spec.get_bool_or(OP, "gpgcheck", true)?,
            repo_gpgcheck: spec.get_bool(OP, "repo_gpgcheck")?,
            gpgkey: spec.get_str("gpgkey"),
            description: spec.get_str("description").unwrap_or_else(|| name.clone()),
            metadata_expire: spec.get_str("metadata_expire"),
            options: spec.get_map(OP, "options")?.unwrap_or_default(),
            path: spec
                .get_path("path")
                .unwrap_or_else(|| PathBuf::from(format!("/etc/yum.repos.d/{name}.repo"))),
            mode: spec.get_mode(OP, "mode")?.unwrap_or(0o644),
            name,
        })
    }

    fn render(&self) -> String {
        let mut lines = vec![format!("[{}]", self.name)];
        lines.push(format!("name={}", self.description));
        if let Some(baseurl) = &self.baseurl {
            lines.push(format!("baseurl={baseurl}"));
        }
        if let Some(mirrorlist) = &self.mirrorlist {
            lines.push(format!("mirrorlist={mirrorlist}"));
        }
        lines.push(format!("enabled={}", self.enabled as u8));
        lines.push(format!("gpgcheck={}", self.gpgcheck as u8));
        if let Some(repo_gpgcheck) = self.repo_gpgcheck {
            lines.push(format!("repo_gpgcheck={}", repo_gpgcheck as u8));
        }
        if let Some(gpgkey) = &self.gpgkey {
            lines.push(format!("gpgkey={gpgkey}"));
        }
        if let Some(expire) = &self.metadata_expire {
            lines.push(format!("metadata_expire={expire}"));
        }
        // ActionData keys iterate sorted, so extra options render stably.
        for (key, value) in &self.options {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lines.push(format!("{key}={rendered}"));
        }
        lines.join("\n") + "\n"
    }
}

impl Operation for YumRepoOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        if !self.present {
            let removed = executor.remove_path(&self.path)?;
            let detail = if removed { "removed" } else { "noop" };
            return Ok(ActionResult::from_change(&host.name, OP, removed, detail));
        }
        let change = executor.write_file(&self.path, &self.render(), Some(self.mode))?;
        Ok(ActionResult::from_change(
            &host.name,
            OP,
            change.changed,
            change.detail,
        ))
    }
}
