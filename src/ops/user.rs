//! User operation: local account lifecycle through the shadow utilities
//! (`useradd`, `usermod`, `userdel`, `passwd`).

use tracing::debug;

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::{Executor, RunOptions};
use crate::plan::{ActionData, Host};

const OP: &str = "user";

/// What the user database currently says about an account.
#[derive(Debug, Clone)]
struct AccountInfo {
    shell: String,
}

fn lookup(name: &str) -> Result<Option<AccountInfo>> {
    let entry = nix::unistd::User::from_name(name)
        .map_err(|e| Error::operation_execution(OP, format!("user lookup failed: {e}")))?;
    Ok(entry.map(|user| AccountInfo {
        shell: user.shell.to_string_lossy().into_owned(),
    }))
}

fn is_locked(executor: &dyn Executor, name: &str) -> Result<bool> {
    let output = executor.run(
        &["passwd".to_string(), "-S".to_string(), name.to_string()],
        &RunOptions::probe(),
    )?;
    if !output.success() {
        return Ok(false);
    }
    // `passwd -S` prints "<name> <status> ..." where a status starting with
    // L means the password is locked.
    Ok(output
        .stdout
        .split_whitespace()
        .nth(1)
        .is_some_and(|status| status.to_uppercase().starts_with('L')))
}

#[derive(Debug)]
pub struct UserOperation {
    name: String,
    present: bool,
    shell: Option<String>,
    system: bool,
    create_home: bool,
    remove_home: bool,
    locked: Option<bool>,
    comment: Option<String>,
}

impl UserOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let name = spec.require_str(OP, "name")?;
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
            name,
            present,
            shell: spec.get_str("shell"),
            system: spec.get_bool_or(OP, "system", false)?,
            create_home: spec.get_bool_or(OP, "create_home", true)?,
            remove_home: spec.get_bool_or(OP, "remove_home", false)?,
            locked: spec.get_bool(OP, "locked")?,
            comment: spec.get_str("comment"),
        })
    }

    fn add(&self, executor: &dyn Executor) -> Result<()> {
        let mut cmd = vec!["useradd".to_string()];
        if let Some(shell) = &self.shell {
            cmd.push("--shell".to_string());
            cmd.push(shell.clone());
        }
        if self.create_home {
            cmd.push("--create-home".to_string());
        }
        if self.system {
            cmd.push("--system".to_string());
        }
        if let Some(comment) = &self.comment {
            cmd.push("--comment".to_string());
            cmd.push(comment.clone());
        }
        cmd.push(self.name.clone());
        executor.run(&cmd, &RunOptions::default())?;
        Ok(())
    }

    fn delete(&self, executor: &dyn Executor) -> Result<()> {
        let mut cmd = vec!["userdel".to_string()];
        if self.remove_home {
            cmd.push("--remove".to_string());
        }
        cmd.push(self.name.clone());
        executor.run(&cmd, &RunOptions::default())?;
        Ok(())
    }
}

impl Operation for UserOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        let info = lookup(&self.name)?;
        let mut changes: Vec<&str> = Vec::new();

        if self.present {
            match &info {
                None => {
                    debug!(user = %self.name, "creating account");
                    self.add(executor)?;
                    changes.push("created");
                }
                Some(info) => {
                    if let Some(shell) = &self.shell {
                        if &info.shell != shell {
                            debug!(user = %self.name, shell = %shell, "updating shell");
                            executor.run(
                                &[
                                    "usermod".to_string(),
                                    "--shell".to_string(),
                                    shell.clone(),
                                    self.name.clone(),
                                ],
                                &RunOptions::default(),
                            )?;
                            changes.push("shell");
                        }
                    }
                }
            }

            if let Some(want_locked) = self.locked {
                let locked = is_locked(executor, &self.name)?;
                if want_locked && !locked {
                    debug!(user = %self.name, "locking password");
                    executor.run(
                        &["passwd".to_string(), "-l".to_string(), self.name.clone()],
                        &RunOptions::default(),
                    )?;
                    changes.push("locked");
                } else if !want_locked && locked {
                    debug!(user = %self.name, "unlocking password");
                    executor.run(
                        &["passwd".to_string(), "-u".to_string(), self.name.clone()],
                        &RunOptions::default(),
                    )?;
                    changes.push("unlocked");
                }
            }
        } else if info.is_some() {
            debug!(user = %self.name, "removing account");
            self.delete(executor)?;
            changes.push("removed");
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
