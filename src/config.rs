//! Engine configuration, read from a TOML file with a `[defaults]` table.
//!
//! A missing config file is not an error: every field has a default so the
//! engine runs out of the box.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default location of the engine configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/forgeops/main.conf";

/// Default plan file, used when neither the CLI nor the config names one.
pub const DEFAULT_PLAN_PATH: &str = "/etc/forgeops/plan.fops";

/// Resolved engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Plan file to converge.
    pub plan: PathBuf,
    /// State file location; `None` means "next to the plan".
    pub state_file: Option<PathBuf>,
    /// Default log filter, overridable from the CLI.
    pub log_level: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plan: PathBuf::from(DEFAULT_PLAN_PATH),
            state_file: None,
            log_level: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    defaults: Defaults,
}

#[derive(Debug, Default, Deserialize)]
struct Defaults {
    plan: Option<PathBuf>,
    state_file: Option<PathBuf>,
    log_level: Option<String>,
}

impl EngineConfig {
    /// Loads the configuration from `path`, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "cannot read '{}': {e}",
                    path.display()
                )))
            }
        };
        let file: ConfigFile = toml::from_str(&text)?;
        let mut config = Self::default();
        if let Some(plan) = file.defaults.plan {
            config.plan = plan;
        }
        config.state_file = file.defaults.state_file;
        config.log_level = file.defaults.log_level;
        Ok(config)
    }

    /// The effective state file for a given plan: the configured one, or the
    /// plan path with `.state.json` appended.
    pub fn state_file_for(&self, plan: &Path) -> PathBuf {
        if let Some(state_file) = &self.state_file {
            return state_file.clone();
        }
        let mut name = plan
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plan".to_string());
        name.push_str(".state.json");
        plan.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = EngineConfig::load(Path::new("/nonexistent/forgeops.conf")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.plan, PathBuf::from(DEFAULT_PLAN_PATH));
    }

    #[test]
    fn defaults_table_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.conf");
        std::fs::write(
            &path,
            r#"
[defaults]
plan = "/srv/plans/site.fops"
state_file = "/var/lib/forgeops/state.json"
log_level = "debug"
"#,
        )
        .unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.plan, PathBuf::from("/srv/plans/site.fops"));
        assert_eq!(
            config.state_file,
            Some(PathBuf::from("/var/lib/forgeops/state.json"))
        );
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn state_file_defaults_next_to_plan() {
        let config = EngineConfig::default();
        assert_eq!(
            config.state_file_for(Path::new("/srv/site.fops")),
            PathBuf::from("/srv/site.fops.state.json")
        );
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.conf");
        std::fs::write(&path, "defaults = 3").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
