//! Mount operation: network filesystems recorded in fstab and mounted at
//! their mount point.
//!
//! The fstab is edited line by line, keyed on the mount point field, so
//! comments and unrelated entries survive untouched.

use std::path::{Path, PathBuf};

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::{Executor, RunOptions};
use crate::plan::{ActionData, Host};

const OP: &str = "mount";

/// The mount point field of a non-comment fstab line.
fn entry_mount_point(line: &str) -> Option<&str> {
    let stripped = line.trim();
    if stripped.is_empty() || stripped.starts_with('#') {
        return None;
    }
    stripped.split_whitespace().nth(1)
}

/// Rewrites fstab content so exactly one entry covers `mount_point`.
fn ensure_entry(content: &str, mount_point: &str, record: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;
    for line in content.lines() {
        if entry_mount_point(line) == Some(mount_point) {
            replaced = true;
            if line.trim() == record {
                lines.push(line.to_string());
            } else {
                lines.push(record.to_string());
            }
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(record.to_string());
    }
    join_lines(lines)
}

/// Rewrites fstab content with any entry for `mount_point` dropped.
fn remove_entry(content: &str, mount_point: &str) -> String {
    let lines: Vec<String> = content
        .lines()
        .filter(|line| entry_mount_point(line) != Some(mount_point))
        .map(str::to_string)
        .collect();
    join_lines(lines)
}

fn join_lines(lines: Vec<String>) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        lines.join("\n") + "\n"
    }
}

/// Ensures a network filesystem entry exists in fstab and is mounted, or
/// that both the entry and the mount are gone.
#[derive(Debug)]
pub struct MountOperation {
    source: String,
    mount_point: String,
    fstype: String,
    options: String,
    present: bool,
    ensure_mounted: bool,
    fstab_path: PathBuf,
}

impl MountOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let source = spec.require_str(OP, "source")?;
        let mount_point = spec.require_str(OP, "mount_point")?;
        if !mount_point.starts_with('/') {
            return Err(Error::operation_args(OP, "mount_point must be absolute"));
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
        let fstype = spec
            .get_str("fstype")
            .or_else(|| spec.get_str("filesystem"))
            .unwrap_or_else(|| "nfs".to_string());
        let options = spec
            .get_str_list(OP, "mount_options")?
            .or(spec.get_str_list(OP, "options")?)
            .map(|opts| opts.join(","))
            .filter(|opts| !opts.is_empty())
            .unwrap_or_else(|| "defaults".to_string());
        Ok(Self {
            source,
            mount_point,
            fstype,
            options,
            present,
            ensure_mounted: spec.get_bool_or(OP, "mount", true)?,
            fstab_path: spec
                .get_path("fstab")
                .unwrap_or_else(|| PathBuf::from("/etc/fstab")),
        })
    }

    fn record(&self) -> String {
        format!(
            "{} {} {} {} 0 0",
            self.source, self.mount_point, self.fstype, self.options
        )
    }

    fn is_mounted(&self, executor: &dyn Executor) -> Result<bool> {
        let output = executor.run(
            &[
                "mountpoint".to_string(),
                "-q".to_string(),
                self.mount_point.clone(),
            ],
            &RunOptions::probe(),
        )?;
        Ok(output.success())
    }
}

impl Operation for MountOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        let mut changes: Vec<&str> = Vec::new();
        let existing = executor.read_file(&self.fstab_path)?.unwrap_or_default();

        if self.present {
            executor.ensure_directory(Path::new(&self.mount_point), None)?;
            let next = ensure_entry(&existing, &self.mount_point, &self.record());
            if next != existing {
                executor.write_file(&self.fstab_path, &next, None)?;
                changes.push("fstab");
            }
            if self.ensure_mounted && !self.is_mounted(executor)? {
                executor.run(
                    &["mount".to_string(), self.mount_point.clone()],
                    &RunOptions::default(),
                )?;
                changes.push("mounted");
            }
        } else {
            let next = remove_entry(&existing, &self.mount_point);
            if next != existing {
                executor.write_file(&self.fstab_path, &next, None)?;
                changes.push("fstab-removed");
            }
            if self.ensure_mounted && self.is_mounted(executor)? {
                executor.run(
                    &["umount".to_string(), self.mount_point.clone()],
                    &RunOptions::default(),
                )?;
                changes.push("unmounted");
            }
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
