//! State reconciliation: remembers what the engine created so that resources
//! dropped from the plan get rolled back on the next run.
//!
//! Only kinds with a destroy builder are tracked. Entries are keyed by the
//! action's resource identity (falling back to a canonical JSON rendering of
//! kind plus configuration), grouped per host. On finalize, every previously
//! recorded entry that was not re-recorded in the current run is destroyed
//! by applying its kind's destroy spec, in reverse dependency order.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::deps;
use crate::error::{Error, Result};
use crate::executor::executor_for;
use crate::ops::{ActionResult, OperationRegistry};
use crate::plan::{Action, ActionData, Plan, RESOURCE_ID_KEY};

/// One tracked resource: enough to rebuild a destroy action for it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Operation kind.
    pub action: String,
    /// The configuration the resource was created with.
    pub spec: ActionData,
    /// Resource identity, when the action carried one.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Dependency edges, kept so destruction can run in reverse order.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

type HostEntries = IndexMap<String, StateEntry>;
type StateData = IndexMap<String, HostEntries>;

/// Builds the configuration that undoes a tracked resource, or `None` for
/// kinds the engine does not reconcile.
pub fn destroy_spec(kind: &str, spec: &ActionData) -> Option<ActionData> {
    let mut spec = spec.clone();
    match kind {
        "file" | "user" | "authorized_key" | "package" | "timezone" | "sysctl" | "cron"
        | "mount" => {
            spec.insert("state".to_string(), Value::String("absent".to_string()));
        }
        "service" => {
            spec.insert("enabled".to_string(), Value::Bool(false));
            spec.insert("state".to_string(), Value::String("stopped".to_string()));
        }
        _ => return None,
    }
    Some(spec)
}

fn is_trackable(kind: &str) -> bool {
    destroy_spec(kind, &ActionData::new()).is_some()
}

/// JSON-backed store of resources created by previous runs.
pub struct StateStore {
    path: PathBuf,
    previous: StateData,
    current: StateData,
}

impl StateStore {
    /// Opens the store at `path`. A missing file yields an empty store; a
    /// corrupt one is logged and treated as empty rather than aborting.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let previous = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "state file is corrupt, starting fresh");
                    StateData::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateData::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "state file is unreadable, starting fresh");
                StateData::new()
            }
        };
        Self {
            path,
            previous,
            current: StateData::new(),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries carried over from the previous run, per host.
    pub fn previous_len(&self, host: &str) -> usize {
        self.previous.get(host).map(|e| e.len()).unwrap_or(0)
    }

    /// Records an applied action for `host`. Untracked kinds are ignored.
    pub fn record(&mut self, host: &str, action: &Action) {
        if !is_trackable(&action.kind) {
            return;
        }
        let resource_id = match action.data.get(RESOURCE_ID_KEY) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        let key = resource_id
            .clone()
            .unwrap_or_else(|| canonical_key(&action.kind, &action.data));
        let entry = StateEntry {
            action: action.kind.clone(),
            spec: action.data.clone(),
            resource_id,
            depends_on: action.depends_on.clone(),
        };
        self.current
            .entry(host.to_string())
            .or_default()
            .insert(key, entry);
    }

    /// Destroys every previously tracked resource absent from the current
    /// run, then persists the new state. Destroy faults never abort the
    /// reconciliation; they surface as failed results.
    pub fn finalize(
        &mut self,
        plan: &Plan,
        registry: &OperationRegistry,
    ) -> Result<Vec<ActionResult>> {
        let mut results = Vec::new();
        for (host_name, entries) in &self.previous {
            let Some(host) = plan.host(host_name) else {
                debug!(host = %host_name, "skipping cleanup for host no longer in the plan");
                continue;
            };
            let retained = self.current.get(host_name);
            for key in destroy_order(entries) {
                if retained.is_some_and(|current| current.contains_key(&key)) {
                    continue;
                }
                let entry = &entries[&key];
                results.push(destroy_entry(host, entry, registry));
            }
        }
        self.write()?;
        Ok(results)
    }

    /// Atomically replaces the state file with the current run's entries.
    fn write(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&self.current)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::State(format!("cannot create temp state file: {e}")))?;
        fs::write(temp.path(), payload)?;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o600))?;
        temp.persist(&self.path)
            .map_err(|e| Error::State(format!("cannot persist state file: {e}")))?;
        self.previous = std::mem::take(&mut self.current);
        Ok(())
    }
}

/// Reverse dependency order over a host's entries: dependents are destroyed
/// before the resources they depend on.
fn destroy_order(entries: &HostEntries) -> Vec<String> {
    let items: Vec<(String, Vec<String>)> = entries
        .iter()
        .map(|(key, entry)| {
            (
                entry.resource_id.clone().unwrap_or_else(|| key.clone()),
                entry.depends_on.clone(),
            )
        })
        .collect();
    let mut order = deps::order_by_dependencies(&items);
    order.reverse();
    let keys: Vec<&String> = entries.keys().collect();
    order.into_iter().map(|i| keys[i].clone()).collect()
}

fn destroy_entry(
    host: &crate::plan::Host,
    entry: &StateEntry,
    registry: &OperationRegistry,
) -> ActionResult {
    let label = entry
        .resource_id
        .clone()
        .unwrap_or_else(|| entry.action.clone());
    let Some(spec) = destroy_spec(&entry.action, &entry.spec) else {
        return ActionResult::failed(
            &host.name,
            &entry.action,
            "no destroy builder for this kind",
        )
        .with_resource(label);
    };
    let Some(factory) = registry.get(&entry.action) else {
        warn!(kind = %entry.action, "no operation registered for tracked kind during cleanup");
        return ActionResult::failed(&host.name, &entry.action, "unknown operation")
            .with_resource(label);
    };
    let outcome = executor_for(host, false)
        .and_then(|executor| factory(&spec).and_then(|op| op.apply(host, executor.as_ref())));
    match outcome {
        Ok(result) => result.with_resource(label),
        Err(e) => {
            error!(kind = %entry.action, host = %host.name, error = %e, "cleanup failed");
            ActionResult::failed(&host.name, &entry.action, e.to_string()).with_resource(label)
        }
    }
}

fn canonical_key(kind: &str, spec: &ActionData) -> String {
    json!({"action": kind, "spec": spec}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(kind: &str, data: Value) -> Action {
        let mut action = Action::new(kind);
        action.data = data.as_object().unwrap().clone();
        action
    }

    #[test]
    fn untracked_kinds_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json"));
        store.record("local", &action("exec", json!({"name": "x", "command": "true"})));
        assert!(store.current.is_empty());
    }

    #[test]
    fn record_keys_by_resource_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json"));
        store.record(
            "local",
            &action("file", json!({"path": "/tmp/x", "_resource_id": "file./tmp/x"})),
        );
        let entries = store.current.get("local").unwrap();
        assert!(entries.contains_key("file./tmp/x"));
        assert_eq!(
            entries["file./tmp/x"].resource_id.as_deref(),
            Some("file./tmp/x")
        );
    }

    #[test]
    fn canonical_key_is_deterministic() {
        let a = canonical_key("file", &action("file", json!({"b": 1, "a": 2})).data);
        let b = canonical_key("file", &action("file", json!({"a": 2, "b": 1})).data);
        assert_eq!(a, b);
    }

    #[test]
    fn corrupt_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = StateStore::open(&path);
        assert!(store.previous.is_empty());
    }

    #[test]
    fn destroy_specs_invert_creation() {
        let spec = destroy_spec("file", &ActionData::new()).unwrap();
        assert_eq!(spec["state"], json!("absent"));

        let spec = destroy_spec("service", &ActionData::new()).unwrap();
        assert_eq!(spec["enabled"], json!(false));
        assert_eq!(spec["state"], json!("stopped"));

        let spec = destroy_spec("mount", &ActionData::new()).unwrap();
        assert_eq!(spec["state"], json!("absent"));

        assert!(destroy_spec("yum_repo", &ActionData::new()).is_none());
        assert!(destroy_spec("exec", &ActionData::new()).is_none());
    }

    #[test]
    fn finalize_destroys_dropped_entries_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let managed = dir.path().join("managed.txt");
        std::fs::write(&managed, "x").unwrap();
        let state_path = dir.path().join("state.json");

        let mut plan = Plan::new();
        let local = crate::plan::Host::new("local");
        plan.hosts.insert(local.name.clone(), local);
        let registry = OperationRegistry::with_builtins();

        // First run: track the file.
        let mut store = StateStore::open(&state_path);
        store.record(
            "local",
            &action("file", json!({"path": managed.to_str().unwrap()})),
        );
        assert!(store.finalize(&plan, &registry).unwrap().is_empty());
        assert!(managed.exists());

        // Second run: the file is gone from the plan, so it gets removed.
        let mut store = StateStore::open(&state_path);
        assert_eq!(store.previous_len("local"), 1);
        let results = store.finalize(&plan, &registry).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].changed);
        assert!(!managed.exists());

        // State file shrank to empty and is private.
        let reopened = StateStore::open(&state_path);
        assert_eq!(reopened.previous_len("local"), 0);
        let mode = std::fs::metadata(&state_path)
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn destroy_order_reverses_dependencies() {
        let mut entries = HostEntries::new();
        entries.insert(
            "file.a".to_string(),
            StateEntry {
                action: "file".to_string(),
                spec: ActionData::new(),
                resource_id: Some("file.a".to_string()),
                depends_on: vec![],
            },
        );
        entries.insert(
            "file.b".to_string(),
            StateEntry {
                action: "file".to_string(),
                spec: ActionData::new(),
                resource_id: Some("file.b".to_string()),
                depends_on: vec!["file.a".to_string()],
            },
        );
        assert_eq!(destroy_order(&entries), vec!["file.b", "file.a"]);
    }

    #[test]
    fn unknown_hosts_are_skipped_on_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        std::fs::write(
            &state_path,
            serde_json::to_string(&json!({
                "ghost": {
                    "file./tmp/x": {
                        "action": "file",
                        "spec": {"path": "/tmp/x"},
                        "resource_id": "file./tmp/x",
                        "depends_on": []
                    }
                }
            }))
            .unwrap(),
        )
        .unwrap();

        let plan = Plan::new();
        let registry = OperationRegistry::with_builtins();
        let mut store = StateStore::open(&state_path);
        let results = store.finalize(&plan, &registry).unwrap();
        assert!(results.is_empty());
    }
}
