//! Operation system: the units of work that converge host state.
//!
//! An [`Operation`] is constructed from an action's configuration (failing
//! fast on missing or malformed fields) and applied against a host through
//! an [`Executor`](crate::executor::Executor) — every externally observable
//! side effect goes through the executor, never directly to the system.
//! Operations are looked up by kind in an [`OperationRegistry`] value that
//! is passed in explicitly, so tests and plugins can substitute or extend
//! without process-wide mutation.

pub mod authorized_key;
pub mod cron;
pub mod exec;
pub mod file;
pub mod mount;
pub mod package;
pub mod service;
pub mod sysctl;
pub mod timezone;
pub mod user;
pub mod yum_repo;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::plan::{ActionData, Host};

/// Per-action outcome, produced once per (host, executed action) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    /// Host the action ran against.
    pub host: String,
    /// Operation kind.
    pub action: String,
    /// Whether the host was mutated (or would be, in dry-run).
    pub changed: bool,
    /// Human-readable summary of what happened.
    pub details: String,
    /// Whether the action failed.
    pub failed: bool,
    /// Display label for the resource, filled in by the runner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

impl ActionResult {
    /// A successful result with no changes.
    pub fn ok(host: impl Into<String>, action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            action: action.into(),
            changed: false,
            details: details.into(),
            failed: false,
            resource: None,
        }
    }

    /// A successful result that changed the host.
    pub fn changed(
        host: impl Into<String>,
        action: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            changed: true,
            ..Self::ok(host, action, details)
        }
    }

    /// A failed result.
    pub fn failed(
        host: impl Into<String>,
        action: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            failed: true,
            ..Self::ok(host, action, details)
        }
    }

    /// Builds a result from a changed flag and detail string.
    pub fn from_change(
        host: impl Into<String>,
        action: impl Into<String>,
        changed: bool,
        details: impl Into<String>,
    ) -> Self {
        Self {
            changed,
            ..Self::ok(host, action, details)
        }
    }

    /// Attaches a display resource label.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// A runnable automation action.
pub trait Operation: Send + Sync {
    /// Performs the operation against `host` using `executor`.
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult>;
}

/// Constructor for an operation kind: validates the action's configuration
/// and builds the operation, or fails with an
/// [`Error::OperationArgs`](crate::error::Error::OperationArgs).
pub type OperationFactory = Arc<dyn Fn(&ActionData) -> Result<Box<dyn Operation>> + Send + Sync>;

/// Registry mapping operation kinds to their constructors.
pub struct OperationRegistry {
    factories: HashMap<String, OperationFactory>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Creates a registry seeded with all built-in operations.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("file", |data| {
            Ok(Box::new(file::FileOperation::from_spec(data)?))
        });
        registry.register("package", |data| {
            Ok(Box::new(package::PackageOperation::from_spec(data)?))
        });
        registry.register("service", |data| {
            Ok(Box::new(service::ServiceOperation::from_spec(data)?))
        });
        registry.register("user", |data| {
            Ok(Box::new(user::UserOperation::from_spec(data)?))
        });
        registry.register("cron", |data| {
            Ok(Box::new(cron::CronOperation::from_spec(data)?))
        });
        registry.register("sysctl", |data| {
            Ok(Box::new(sysctl::SysctlOperation::from_spec(data)?))
        });
        registry.register("timezone", |data| {
            Ok(Box::new(timezone::TimezoneOperation::from_spec(data)?))
        });
        registry.register("authorized_key", |data| {
            Ok(Box::new(authorized_key::AuthorizedKeyOperation::from_spec(
                data,
            )?))
        });
        registry.register("exec", |data| {
            Ok(Box::new(exec::ExecOperation::from_spec(data)?))
        });
        registry.register("mount", |data| {
            Ok(Box::new(mount::MountOperation::from_spec(data)?))
        });
        registry.register("yum_repo", |data| {
            Ok(Box::new(yum_repo::YumRepoOperation::from_spec(data)?))
        });
        registry
    }

    /// Registers (or replaces) a constructor for an operation kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ActionData) -> Result<Box<dyn Operation>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Looks up the constructor for a kind.
    pub fn get(&self, kind: &str) -> Option<OperationFactory> {
        self.factories.get(kind).cloned()
    }

    /// Whether a kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// All registered kinds.
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Helper trait for extracting typed fields from an action's configuration.
///
/// Accessors take the operation kind so failures surface as that
/// operation's argument errors.
pub trait SpecExt {
    /// String (or stringified scalar) field.
    fn get_str(&self, key: &str) -> Option<String>;
    /// Required string field.
    fn require_str(&self, op: &str, key: &str) -> Result<String>;
    /// Boolean field; accepts true/false, yes/no, on/off, 1/0.
    fn get_bool(&self, op: &str, key: &str) -> Result<Option<bool>>;
    /// Boolean field with a default.
    fn get_bool_or(&self, op: &str, key: &str, default: bool) -> Result<bool>;
    /// Integer field.
    fn get_i64(&self, op: &str, key: &str) -> Result<Option<i64>>;
    /// String-or-list field flattened to a list.
    fn get_str_list(&self, op: &str, key: &str) -> Result<Option<Vec<String>>>;
    /// Path field.
    fn get_path(&self, key: &str) -> Option<PathBuf>;
    /// Permission bits: integers pass through, strings parse octal when they
    /// start with `0` and decimal otherwise.
    fn get_mode(&self, op: &str, key: &str) -> Result<Option<u32>>;
    /// Map field.
    fn get_map(&self, op: &str, key: &str) -> Result<Option<ActionData>>;
}

impl SpecExt for ActionData {
    fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn require_str(&self, op: &str, key: &str) -> Result<String> {
        self.get_str(key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::operation_args(op, format!("requires a {key}")))
    }

    fn get_bool(&self, op: &str, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "off" | "0" => Ok(Some(false)),
                other => Err(Error::operation_args(
                    op,
                    format!("cannot interpret '{other}' as a boolean for {key}"),
                )),
            },
            Some(Value::Number(n)) => Ok(Some(n.as_i64() != Some(0))),
            Some(_) => Err(Error::operation_args(
                op,
                format!("{key} must be a boolean"),
            )),
        }
    }

    fn get_bool_or(&self, op: &str, key: &str, default: bool) -> Result<bool> {
        Ok(self.get_bool(op, key)?.unwrap_or(default))
    }

    fn get_i64(&self, op: &str, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
                Error::operation_args(op, format!("{key} must be an integer"))
            }),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| {
                Error::operation_args(op, format!("{key} must be an integer"))
            }),
            Some(_) => Err(Error::operation_args(
                op,
                format!("{key} must be an integer"),
            )),
        }
    }

    fn get_str_list(&self, op: &str, key: &str) -> Result<Option<Vec<String>>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s.clone()),
                        Value::Number(n) => out.push(n.to_string()),
                        other => {
                            return Err(Error::operation_args(
                                op,
                                format!("{key} entries must be strings, got {other}"),
                            ))
                        }
                    }
                }
                Ok(Some(out))
            }
            Some(_) => Err(Error::operation_args(
                op,
                format!("{key} must be a string or a list of strings"),
            )),
        }
    }

    fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    fn get_mode(&self, op: &str, key: &str) -> Result<Option<u32>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| Error::operation_args(op, format!("{key} must be a mode"))),
            Some(Value::String(s)) => {
                let text = s.trim();
                if text.is_empty() {
                    return Ok(None);
                }
                let radix = if text.starts_with('0') { 8 } else { 10 };
                u32::from_str_radix(text, radix).map(Some).map_err(|_| {
                    Error::operation_args(op, format!("invalid mode '{text}' for {key}"))
                })
            }
            Some(_) => Err(Error::operation_args(op, format!("{key} must be a mode"))),
        }
    }

    fn get_map(&self, op: &str, key: &str) -> Result<Option<ActionData>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map.clone())),
            Some(_) => Err(Error::operation_args(op, format!("{key} must be a map"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> ActionData {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn registry_builds_and_reports_unknowns() {
        let registry = OperationRegistry::with_builtins();
        assert!(registry.contains("file"));
        assert!(registry.contains("exec"));
        assert!(registry.contains("mount"));
        assert!(registry.contains("yum_repo"));
        assert!(!registry.contains("frobnicate"));
        assert!(registry.get("frobnicate").is_none());
    }

    #[test]
    fn register_replaces_constructor() {
        struct Noop;
        impl Operation for Noop {
            fn apply(&self, host: &Host, _executor: &dyn Executor) -> Result<ActionResult> {
                Ok(ActionResult::ok(&host.name, "noop", "noop"))
            }
        }

        let mut registry = OperationRegistry::new();
        registry.register("noop", |_data| Ok(Box::new(Noop)));
        assert!(registry.contains("noop"));
        let op = registry.get("noop").unwrap()(&ActionData::new()).unwrap();
        let result = op
            .apply(&Host::new("local"), &crate::executor::LocalExecutor::new(true))
            .unwrap();
        assert!(!result.changed);
    }

    #[test]
    fn spec_ext_bool_coercions() {
        let spec = data(json!({"a": true, "b": "yes", "c": "off", "d": "maybe"}));
        assert_eq!(spec.get_bool("t", "a").unwrap(), Some(true));
        assert_eq!(spec.get_bool("t", "b").unwrap(), Some(true));
        assert_eq!(spec.get_bool("t", "c").unwrap(), Some(false));
        assert!(spec.get_bool("t", "d").is_err());
        assert_eq!(spec.get_bool("t", "missing").unwrap(), None);
    }

    #[test]
    fn spec_ext_mode_parsing() {
        let spec = data(json!({"octal": "0644", "decimal": 420, "bad": "9z"}));
        assert_eq!(spec.get_mode("t", "octal").unwrap(), Some(0o644));
        assert_eq!(spec.get_mode("t", "decimal").unwrap(), Some(420));
        assert!(spec.get_mode("t", "bad").is_err());
    }

    #[test]
    fn spec_ext_lists_accept_scalars() {
        let spec = data(json!({"one": "nginx", "many": ["a", "b"]}));
        assert_eq!(
            spec.get_str_list("t", "one").unwrap(),
            Some(vec!["nginx".to_string()])
        );
        assert_eq!(
            spec.get_str_list("t", "many").unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }
}
