//! File operation: files, directories and symlinks with content, mode and
//! ownership management.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::{Change, Executor};
use crate::plan::{ActionData, Host, PLAN_DIR_KEY};

const OP: &str = "file";

/// Ensures a path is a file with given content, a directory, a symlink, or
/// absent. Templates are rendered with the host's variables merged with the
/// action's `variables` map.
#[derive(Debug)]
pub struct FileOperation {
    path: PathBuf,
    state: FileState,
    content: String,
    mode: Option<u32>,
    template: Option<PathBuf>,
    variables: ActionData,
    plan_dir: Option<PathBuf>,
    link_target: Option<String>,
    owner: Option<u32>,
    group: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    Present,
    Absent,
    Directory,
}

impl FileOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let path = spec
            .get_path("path")
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::operation_args(OP, "requires a path"))?;
        let state = match spec.get_str("state").as_deref() {
            None | Some("present") => FileState::Present,
            Some("absent") => FileState::Absent,
            Some("directory") => FileState::Directory,
            Some(other) => {
                return Err(Error::operation_args(
                    OP,
                    format!("state must be 'present', 'absent' or 'directory', got '{other}'"),
                ))
            }
        };
        Ok(Self {
            path,
            state,
            content: spec.get_str("content").unwrap_or_default(),
            mode: spec.get_mode(OP, "mode")?,
            template: spec.get_path("template"),
            variables: spec.get_map(OP, "variables")?.unwrap_or_default(),
            plan_dir: spec.get_path(PLAN_DIR_KEY),
            link_target: spec
                .get_str("link_target")
                .or_else(|| spec.get_str("target")),
            owner: resolve_owner(spec.get_str("owner"))?,
            group: resolve_group(spec.get_str("group"))?,
        })
    }

    fn render_content(&self, host: &Host) -> Result<String> {
        let Some(template) = &self.template else {
            return Ok(self.content.clone());
        };
        // Relative template paths resolve against the directory the plan
        // file was loaded from.
        let template_path = if template.is_absolute() {
            template.clone()
        } else {
            match &self.plan_dir {
                Some(dir) => dir.join(template),
                None => template.clone(),
            }
        };
        let source = std::fs::read_to_string(&template_path).map_err(|e| {
            Error::operation_execution(
                OP,
                format!("cannot read template '{}': {e}", template_path.display()),
            )
        })?;

        let mut context: HashMap<String, Value> = host.variables.clone();
        for (key, value) in &self.variables {
            context.insert(key.clone(), value.clone());
        }
        let env = minijinja::Environment::new();
        Ok(env.render_str(&source, context)?)
    }

    fn apply_symlink(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        let target = self.link_target.as_deref().unwrap_or_default();
        if self.state == FileState::Absent {
            let removed = executor.remove_path(&self.path)?;
            let detail = if removed { "removed" } else { "noop" };
            return Ok(ActionResult::from_change(&host.name, OP, removed, detail));
        }

        let current = std::fs::read_link(&self.path)
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        if current.as_deref() == Some(target) {
            return Ok(ActionResult::ok(&host.name, OP, "noop"));
        }
        if !executor.dry_run() {
            executor.remove_path(&self.path)?;
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink(target, &self.path)?;
        }
        Ok(ActionResult::changed(
            &host.name,
            OP,
            format!("link->{target}"),
        ))
    }

    fn apply_ownership(&self, executor: &dyn Executor, change: Change) -> Result<Change> {
        if self.owner.is_none() && self.group.is_none() {
            return Ok(change);
        }
        let chown = executor.set_ownership(&self.path, self.owner, self.group)?;
        if !chown.changed {
            return Ok(change);
        }
        let detail = if change.changed {
            format!("{}, {}", change.detail, chown.detail)
        } else {
            chown.detail
        };
        Ok(Change::new(detail))
    }
}

impl Operation for FileOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        if self.link_target.is_some() {
            return self.apply_symlink(host, executor);
        }
        let change = match self.state {
            FileState::Directory => executor.ensure_directory(&self.path, self.mode)?,
            FileState::Absent => {
                let removed = executor.remove_path(&self.path)?;
                if removed {
                    Change::new("removed")
                } else {
                    Change::noop()
                }
            }
            FileState::Present => {
                let content = self.render_content(host)?;
                executor.write_file(&self.path, &content, self.mode)?
            }
        };
        let change = self.apply_ownership(executor, change)?;
        Ok(ActionResult::from_change(
            &host.name,
            OP,
            change.changed,
            change.detail,
        ))
    }
}

/// Resolves an owner field to a uid: numeric strings pass through, names go
/// through the user database.
fn resolve_owner(value: Option<String>) -> Result<Option<u32>> {
    let Some(text) = value else { return Ok(None) };
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(uid) = text.parse::<u32>() {
        return Ok(Some(uid));
    }
    let user = nix::unistd::User::from_name(text)
        .map_err(|e| Error::operation_args(OP, format!("user lookup failed: {e}")))?
        .ok_or_else(|| Error::operation_args(OP, format!("unknown user '{text}'")))?;
    Ok(Some(user.uid.as_raw()))
}

fn resolve_group(value: Option<String>) -> Result<Option<u32>> {
    let Some(text) = value else { return Ok(None) };
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(gid) = text.parse::<u32>() {
        return Ok(Some(gid));
    }
    let group = nix::unistd::Group::from_name(text)
        .map_err(|e| Error::operation_args(OP, format!("group lookup failed: {e}")))?
        .ok_or_else(|| Error::operation_args(OP, format!("unknown group '{text}'")))?;
    Ok(Some(group.gid.as_raw()))
}
