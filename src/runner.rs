//! Task runner: walks a plan and converges each host.
//!
//! For every (task, host) pair the actions are assigned resource identities,
//! sorted by their dependency edges and applied in that order. A failing
//! action never aborts the run; it becomes a failed result and execution
//! moves on. `on_success` branches fire only when the parent reported a
//! change, `on_failure` branches only when it failed.

use tracing::{debug, error};

use crate::deps;
use crate::error::{Error, Result};
use crate::executor::{executor_for, Executor};
use crate::ops::{ActionResult, OperationRegistry};
use crate::plan::{Action, ActionData, Host, Plan, Task, RESOURCE_ID_KEY};
use crate::state::StateStore;

/// Called before each action starts, for progress display.
pub type ProgressCallback = Box<dyn Fn(&Host, &Action)>;

/// Coordinates the execution of a plan's tasks.
pub struct TaskRunner<'a> {
    plan: &'a Plan,
    registry: &'a OperationRegistry,
    dry_run: bool,
    state_store: Option<StateStore>,
    progress: Option<ProgressCallback>,
}

impl<'a> TaskRunner<'a> {
    pub fn new(plan: &'a Plan, registry: &'a OperationRegistry) -> Self {
        Self {
            plan,
            registry,
            dry_run: false,
            state_store: None,
            progress: None,
        }
    }

    /// Enables dry-run mode: probes run, mutations are reported but skipped.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Attaches a state store for drift reconciliation.
    pub fn state_store(mut self, store: StateStore) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Sets a progress callback invoked before each action.
    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Runs every task against every one of its hosts, then reconciles the
    /// state store. Returns one result per executed action, including the
    /// destroy results appended by reconciliation.
    pub fn run(&mut self) -> Result<Vec<ActionResult>> {
        let mut results = Vec::new();
        let plan = self.plan;
        for task in &plan.tasks {
            self.run_task(task, &mut results)?;
        }
        if let Some(store) = &mut self.state_store {
            results.extend(store.finalize(self.plan, self.registry)?);
        }
        Ok(results)
    }

    fn run_task(&mut self, task: &Task, results: &mut Vec<ActionResult>) -> Result<()> {
        debug!(task = %task.name, hosts = %task.hosts.join(","), "running task");
        let plan = self.plan;
        for host_name in &task.hosts {
            let host = plan
                .host(host_name)
                .ok_or_else(|| Error::HostNotFound(host_name.clone()))?;
            let executor = executor_for(host, self.dry_run)?;

            let actions = with_resource_ids(&task.actions);
            for index in order_actions(&actions) {
                self.run_action(host, executor.as_ref(), &actions[index], results);
            }
        }
        Ok(())
    }

    /// Applies one action and recursively its triggered branch. Branch
    /// actions get their own resource identities and are dependency-ordered
    /// among themselves before running.
    fn run_action(
        &mut self,
        host: &Host,
        executor: &dyn Executor,
        action: &Action,
        results: &mut Vec<ActionResult>,
    ) {
        if let Some(progress) = &self.progress {
            progress(host, action);
        }

        let result = self.apply_action(host, executor, action);
        debug!(
            action = %action.kind,
            host = %host.name,
            changed = result.changed,
            failed = result.failed,
            "action finished"
        );

        let branch: &[Action] = if result.failed {
            &action.on_failure
        } else if result.changed {
            &action.on_success
        } else {
            &[]
        };
        results.push(result);

        if !branch.is_empty() {
            let nested = with_resource_ids(branch);
            for index in order_actions(&nested) {
                self.run_action(host, executor, &nested[index], results);
            }
        }
    }

    fn apply_action(
        &mut self,
        host: &Host,
        executor: &dyn Executor,
        action: &Action,
    ) -> ActionResult {
        let label = resource_label(&action.data);
        let Some(factory) = self.registry.get(&action.kind) else {
            return ActionResult::failed(
                &host.name,
                &action.kind,
                format!("unknown operation '{}'", action.kind),
            )
            .with_label(label);
        };

        let outcome = factory(&action.data).and_then(|op| op.apply(host, executor));
        let result = match outcome {
            Ok(result) => {
                if !result.failed {
                    if let Some(store) = &mut self.state_store {
                        store.record(&host.name, action);
                    }
                }
                result
            }
            Err(e) => {
                error!(action = %action.kind, host = %host.name, error = %e, "action failed");
                ActionResult::failed(&host.name, &action.kind, e.to_string())
            }
        };
        result.with_label(label)
    }
}

trait WithLabel {
    fn with_label(self, label: Option<String>) -> Self;
}

impl WithLabel for ActionResult {
    fn with_label(mut self, label: Option<String>) -> Self {
        if self.resource.is_none() {
            self.resource = label;
        }
        self
    }
}

/// Clones `actions` with each one's resource identity injected into its data
/// under [`RESOURCE_ID_KEY`], so operations and the state store see it.
fn with_resource_ids(actions: &[Action]) -> Vec<Action> {
    actions
        .iter()
        .enumerate()
        .map(|(index, action)| {
            let mut action = action.clone();
            let id = action.resource_id(index);
            action
                .data
                .insert(RESOURCE_ID_KEY.to_string(), serde_json::Value::String(id));
            action
        })
        .collect()
}

/// Dependency order over a list of actions that already carry resource ids.
fn order_actions(actions: &[Action]) -> Vec<usize> {
    let items: Vec<(String, Vec<String>)> = actions
        .iter()
        .enumerate()
        .map(|(index, action)| (action.resource_id(index), action.depends_on.clone()))
        .collect();
    deps::order_by_dependencies(&items)
}

/// Human-facing label for a result line: the most name-like field available.
fn resource_label(data: &ActionData) -> Option<String> {
    for key in ["resource", "name", "path", "mount_point", "user", "service"] {
        if let Some(serde_json::Value::String(value)) = data.get(key) {
            if !value.is_empty() {
                return Some(value.clone());
            }
        }
    }
    if let Some(serde_json::Value::Array(packages)) = data.get("packages") {
        if !packages.is_empty() {
            let mut rendered: Vec<String> = packages
                .iter()
                .take(3)
                .map(|p| match p {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            if packages.len() > 3 {
                rendered.push("...".to_string());
            }
            return Some(rendered.join(", "));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(kind: &str, data: serde_json::Value) -> Action {
        let mut action = Action::new(kind);
        action.data = data.as_object().unwrap().clone();
        action
    }

    fn single_host_plan(actions: Vec<Action>) -> Plan {
        let mut plan = Plan::new();
        let local = Host::new("local");
        plan.hosts.insert(local.name.clone(), local);
        plan.tasks.push(Task {
            name: "test".to_string(),
            hosts: vec!["local".to_string()],
            actions,
        });
        plan
    }

    #[test]
    fn unknown_operation_is_one_failed_result() {
        let plan = single_host_plan(vec![action("frobnicate", json!({"name": "x"}))]);
        let registry = OperationRegistry::with_builtins();
        let results = TaskRunner::new(&plan, &registry).run().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].failed);
        assert!(results[0].details.contains("unknown operation"));
        assert_eq!(results[0].resource.as_deref(), Some("x"));
    }

    #[test]
    fn missing_host_aborts_the_run() {
        let mut plan = single_host_plan(vec![]);
        plan.tasks[0].hosts = vec!["ghost".to_string()];
        let registry = OperationRegistry::with_builtins();
        let err = TaskRunner::new(&plan, &registry).run().unwrap_err();
        assert!(matches!(err, Error::HostNotFound(name) if name == "ghost"));
    }

    #[test]
    fn constructor_errors_become_failed_results() {
        // file without a path fails construction, not the whole run.
        let plan = single_host_plan(vec![
            action("file", json!({"state": "present"})),
            action("exec", json!({"name": "after", "command": ["true"]})),
        ]);
        let registry = OperationRegistry::with_builtins();
        let results = TaskRunner::new(&plan, &registry)
            .dry_run(true)
            .run()
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].failed);
        assert!(!results[1].failed);
    }

    #[test]
    fn dependencies_reorder_execution() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        let mut dependent = action("file", json!({"path": first.to_str().unwrap()}));
        dependent.depends_on = vec![format!("file.{}", second.display())];
        let plan = single_host_plan(vec![
            dependent,
            action("file", json!({"path": second.to_str().unwrap()})),
        ]);
        let registry = OperationRegistry::with_builtins();
        let results = TaskRunner::new(&plan, &registry).run().unwrap();
        assert_eq!(
            results[0].resource.as_deref(),
            Some(second.to_str().unwrap())
        );
        assert_eq!(
            results[1].resource.as_deref(),
            Some(first.to_str().unwrap())
        );
    }

    #[test]
    fn branches_fire_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let mut parent = action("exec", json!({"name": "parent", "command": ["true"]}));
        parent.on_success = vec![action(
            "file",
            json!({"path": marker.to_str().unwrap(), "content": "fired"}),
        )];
        parent.on_failure = vec![action("exec", json!({"name": "never", "command": ["false"]}))];

        let plan = single_host_plan(vec![parent]);
        let registry = OperationRegistry::with_builtins();
        let results = TaskRunner::new(&plan, &registry).run().unwrap();
        // parent + on_success child, no on_failure child.
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].action, "file");
        assert!(marker.exists());
    }

    #[test]
    fn failure_branch_fires_on_failure() {
        let mut parent = action("exec", json!({"name": "parent", "command": ["false"]}));
        parent.on_failure = vec![action("exec", json!({"name": "cleanup", "command": ["true"]}))];
        let plan = single_host_plan(vec![parent]);
        let registry = OperationRegistry::with_builtins();
        let results = TaskRunner::new(&plan, &registry).run().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].failed);
        assert!(!results[1].failed);
    }

    #[test]
    fn unchanged_ok_triggers_no_branch() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("present");
        std::fs::write(&existing, "").unwrap();
        let mut parent = action(
            "exec",
            json!({
                "name": "guarded",
                "command": ["true"],
                "creates": existing.to_str().unwrap(),
            }),
        );
        parent.on_success = vec![action("exec", json!({"name": "child", "command": ["true"]}))];
        let plan = single_host_plan(vec![parent]);
        let registry = OperationRegistry::with_builtins();
        let results = TaskRunner::new(&plan, &registry).run().unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].changed);
    }
}
