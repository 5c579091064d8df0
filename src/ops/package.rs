//! Package operation: install or remove packages through whichever package
//! manager the host carries.
//!
//! Manager selection probes the PATH for `apt-get`, `dnf`, `yum`, `brew` and
//! `pacman` in that order; an explicit `manager` field overrides detection.
//! Install and remove work on the subset of packages that actually needs
//! changing, so converged hosts report no change.

use tracing::debug;

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::{Executor, RunOptions};
use crate::plan::{ActionData, Host};

const OP: &str = "package";

#[derive(Debug)]
pub struct PackageOperation {
    packages: Vec<String>,
    present: bool,
    preferred_manager: Option<String>,
}

impl PackageOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let packages = spec
            .get_str_list(OP, "name")?
            .or(spec.get_str_list(OP, "packages")?)
            .unwrap_or_default();
        if packages.is_empty() {
            return Err(Error::operation_args(OP, "requires at least one package"));
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
        Ok(Self {
            packages,
            present,
            preferred_manager: spec.get_str("manager"),
        })
    }
}

impl Operation for PackageOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        let manager = PackageManager::select(self.preferred_manager.as_deref())?;
        debug!(manager = manager.name(), host = %host.name, packages = ?self.packages, "package convergence");

        let (changed, details) = if self.present {
            manager.ensure_present(executor, &self.packages)?
        } else {
            manager.ensure_absent(executor, &self.packages)?
        };
        let details = format!("manager={} {details}", manager.name());
        Ok(ActionResult::from_change(
            &host.name,
            OP,
            changed,
            details.trim_end(),
        ))
    }
}

/// The package managers the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Brew,
    Pacman,
}

impl PackageManager {
    const DETECTION_ORDER: [(&'static str, &'static str, PackageManager); 5] = [
        ("apt-get", "apt", PackageManager::Apt),
        ("dnf", "dnf", PackageManager::Dnf),
        ("yum", "yum", PackageManager::Yum),
        ("brew", "brew", PackageManager::Brew),
        ("pacman", "pacman", PackageManager::Pacman),
    ];

    /// Resolves the manager to use: the requested one if given, otherwise
    /// the first whose binary is on the PATH.
    pub fn select(preferred: Option<&str>) -> Result<Self> {
        if let Some(name) = preferred {
            let wanted = name.to_lowercase();
            return Self::DETECTION_ORDER
                .iter()
                .find(|(_, key, _)| *key == wanted)
                .map(|(_, _, manager)| *manager)
                .ok_or_else(|| {
                    Error::operation_args(OP, format!("unknown package manager '{name}'"))
                });
        }
        for (binary, _, manager) in Self::DETECTION_ORDER {
            if which::which(binary).is_ok() {
                return Ok(manager);
            }
        }
        Err(Error::operation_execution(
            OP,
            "no supported package manager found on PATH",
        ))
    }

    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Brew => "brew",
            PackageManager::Pacman => "pacman",
        }
    }

    fn ensure_present(
        &self,
        executor: &dyn Executor,
        packages: &[String],
    ) -> Result<(bool, String)> {
        let mut needed = Vec::new();
        for package in packages {
            if !self.is_installed(executor, package)? {
                needed.push(package.clone());
            }
        }
        if needed.is_empty() {
            return Ok((false, "already-installed".to_string()));
        }
        self.install(executor, &needed)?;
        Ok((true, format!("installed={}", needed.join(","))))
    }

    fn ensure_absent(
        &self,
        executor: &dyn Executor,
        packages: &[String],
    ) -> Result<(bool, String)> {
        let mut removable = Vec::new();
        for package in packages {
            if self.is_installed(executor, package)? {
                removable.push(package.clone());
            }
        }
        if removable.is_empty() {
            return Ok((false, "already-removed".to_string()));
        }
        self.remove(executor, &removable)?;
        Ok((true, format!("removed={}", removable.join(","))))
    }

    fn install(&self, executor: &dyn Executor, packages: &[String]) -> Result<()> {
        let mut command: Vec<String> = match self {
            PackageManager::Apt => vec!["apt-get".into(), "install".into(), "-y".into()],
            PackageManager::Dnf => vec!["dnf".into(), "install".into(), "-y".into()],
            PackageManager::Yum => vec!["yum".into(), "install".into(), "-y".into()],
            PackageManager::Brew => vec!["brew".into(), "install".into()],
            PackageManager::Pacman => vec!["pacman".into(), "-S".into(), "--noconfirm".into()],
        };
        command.extend(packages.iter().cloned());
        executor.run(&command, &RunOptions::default())?;
        Ok(())
    }

    fn remove(&self, executor: &dyn Executor, packages: &[String]) -> Result<()> {
        let mut command: Vec<String> = match self {
            PackageManager::Apt => vec!["apt-get".into(), "remove".into(), "-y".into()],
            PackageManager::Dnf => vec!["dnf".into(), "remove".into(), "-y".into()],
            PackageManager::Yum => vec!["yum".into(), "remove".into(), "-y".into()],
            PackageManager::Brew => vec!["brew".into(), "uninstall".into()],
            PackageManager::Pacman => vec!["pacman".into(), "-R".into(), "--noconfirm".into()],
        };
        command.extend(packages.iter().cloned());
        executor.run(&command, &RunOptions::default())?;
        Ok(())
    }

    fn is_installed(&self, executor: &dyn Executor, package: &str) -> Result<bool> {
        let command: Vec<String> = match self {
            PackageManager::Apt => vec![
                "dpkg-query".into(),
                "-W".into(),
                "-f".into(),
                "${Status}".into(),
                package.into(),
            ],
            PackageManager::Dnf | PackageManager::Yum => {
                vec!["rpm".into(), "-q".into(), package.into()]
            }
            PackageManager::Brew => vec!["brew".into(), "list".into(), package.into()],
            PackageManager::Pacman => vec!["pacman".into(), "-Qi".into(), package.into()],
        };
        let output = executor.run(&command, &RunOptions::probe())?;
        Ok(match self {
            PackageManager::Apt => output.success() && output.stdout.contains("installed"),
            _ => output.success(),
        })
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
    fn accepts_name_scalar_or_packages_list() {
        let op = PackageOperation::from_spec(&spec(json!({"name": "nginx"}))).unwrap();
        assert_eq!(op.packages, vec!["nginx"]);

        let op =
            PackageOperation::from_spec(&spec(json!({"packages": ["curl", "git"]}))).unwrap();
        assert_eq!(op.packages, vec!["curl", "git"]);
    }

    #[test]
    fn requires_at_least_one_package() {
        let err = PackageOperation::from_spec(&spec(json!({"state": "present"}))).unwrap_err();
        assert!(err.to_string().contains("at least one package"));
    }

    #[test]
    fn explicit_manager_overrides_detection() {
        assert_eq!(
            PackageManager::select(Some("pacman")).unwrap(),
            PackageManager::Pacman
        );
        assert_eq!(
            PackageManager::select(Some("APT")).unwrap(),
            PackageManager::Apt
        );
        assert!(PackageManager::select(Some("nix-env")).is_err());
    }

    #[test]
    fn rejects_unknown_state() {
        let err = PackageOperation::from_spec(&spec(json!({
            "name": "nginx",
            "state": "latest",
        })))
        .unwrap_err();
        assert!(err.to_string().contains("state"));
    }
}
