//! Plan loading: dispatches on file extension, splices `include` directives
//! and decorates parse errors with their origin.
//!
//! `.toml` files use the alternate TOML plan format; `.fops` and `.pp` files
//! are DSL sources with include support; anything else is tried as DSL first
//! and as TOML when that fails to parse. Every loaded action gets the plan
//! file's directory injected under `_plan_dir` so relative template paths
//! resolve against the plan.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::dsl;
use crate::error::{Error, Result};
use crate::plan::{Action, Connection, Host, Plan, Task, PLAN_DIR_KEY};

/// Loads a plan from `path`, dispatching on the file extension.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    debug!(path = %path.display(), "loading plan");

    let mut plan = match extension.as_deref() {
        Some("toml") => {
            let text = read(path)?;
            parse_toml(&text).map_err(|e| Error::plan_load(path, e.to_string()))?
        }
        Some("fops") | Some("pp") => {
            let text = read_with_includes(path, &mut HashSet::new())?;
            dsl::parse(&text).map_err(|e| decorate_parse_error(path, &text, e))?
        }
        _ => {
            let text = read(path)?;
            match dsl::parse(&text) {
                Ok(plan) => plan,
                Err(Error::Parse { .. }) => {
                    parse_toml(&text).map_err(|e| Error::plan_load(path, e.to_string()))?
                }
                Err(e) => return Err(decorate_parse_error(path, &text, e)),
            }
        }
    };

    let plan_dir = path.parent().unwrap_or_else(|| Path::new("."));
    attach_plan_dir(&mut plan, plan_dir);
    Ok(plan)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::plan_load(path, e.to_string()))
}

/// Reads a DSL source, splicing `include 'file'` lines in place. Includes
/// resolve relative to the including file; a file including itself (directly
/// or transitively) is an error.
fn read_with_includes(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<String> {
    let include_re = Regex::new(r#"^include\s+['"]([^'"]+)['"]\s*$"#).expect("valid regex");

    let real = path
        .canonicalize()
        .map_err(|e| Error::plan_load(path, e.to_string()))?;
    if !seen.insert(real) {
        return Err(Error::plan_load(path, "recursive include detected"));
    }

    let text = read(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut lines = Vec::new();
    for line in text.lines() {
        match include_re.captures(line.trim()) {
            Some(captures) => {
                let include_path = base.join(&captures[1]);
                lines.push(read_with_includes(&include_path, seen)?);
            }
            None => lines.push(line.to_string()),
        }
    }
    Ok(lines.join("\n"))
}

/// Prefixes a parse error with the file, position and offending source line.
fn decorate_parse_error(path: &Path, text: &str, error: Error) -> Error {
    let Some((line, column)) = error.position() else {
        return Error::plan_load(path, error.to_string());
    };
    let snippet = text
        .lines()
        .nth(line.saturating_sub(1))
        .map(str::trim)
        .unwrap_or_default();
    let mut message = format!("{line}:{column} {error}");
    if !snippet.is_empty() {
        message = format!("{message} -> {snippet}");
    }
    Error::plan_load(path, message)
}

fn attach_plan_dir(plan: &mut Plan, base: &Path) {
    let dir = Value::String(base.to_string_lossy().into_owned());
    fn assign(action: &mut Action, dir: &Value) {
        action
            .data
            .entry(PLAN_DIR_KEY.to_string())
            .or_insert_with(|| dir.clone());
        for child in &mut action.on_success {
            assign(child, dir);
        }
        for child in &mut action.on_failure {
            assign(child, dir);
        }
    }
    for task in &mut plan.tasks {
        for action in &mut task.actions {
            assign(action, &dir);
        }
    }
}

// ============================================================================
// TOML plan format
// ============================================================================

fn parse_toml(text: &str) -> Result<Plan> {
    let document: toml::Value = toml::from_str(text)?;
    let mut plan = Plan::new();

    if let Some(hosts) = document.get("hosts").and_then(|v| v.as_table()) {
        for (name, payload) in hosts {
            plan.hosts.insert(name.clone(), parse_host(name, payload)?);
        }
    }
    if plan.hosts.is_empty() {
        let local = Host::new("local");
        plan.hosts.insert(local.name.clone(), local);
    }

    if let Some(tasks) = document.get("tasks").and_then(|v| v.as_array()) {
        for (index, task) in tasks.iter().enumerate() {
            plan.tasks
                .push(parse_task(task, index + 1, &plan.hosts.keys().cloned().collect::<Vec<_>>())?);
        }
    }
    Ok(plan)
}

fn parse_host(name: &str, payload: &toml::Value) -> Result<Host> {
    let mut host = Host::new(name);
    if let Some(connection) = payload.get("connection").and_then(|v| v.as_str()) {
        host.connection = Connection::from_str(connection)?;
    }
    host.address = payload
        .get("address")
        .and_then(|v| v.as_str())
        .map(String::from);
    if let Some(variables) = payload.get("variables").and_then(|v| v.as_table()) {
        for (key, value) in variables {
            host.variables.insert(key.clone(), toml_to_json(value));
        }
    }
    Ok(host)
}

fn parse_task(value: &toml::Value, index: usize, all_hosts: &[String]) -> Result<Task> {
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| format!("task-{index}"));
    let hosts: Vec<String> = match value.get("hosts").and_then(|v| v.as_array()) {
        Some(items) if !items.is_empty() => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect(),
        // A task without explicit hosts targets every declared host.
        _ => all_hosts.to_vec(),
    };

    let mut actions = Vec::new();
    if let Some(raw_actions) = value.get("actions").and_then(|v| v.as_array()) {
        for (position, action) in raw_actions.iter().enumerate() {
            actions.push(parse_action(
                action,
                &format!("{index}.{}", position + 1),
            )?);
        }
    }
    Ok(Task {
        name,
        hosts,
        actions,
    })
}

fn parse_action(value: &toml::Value, position: &str) -> Result<Action> {
    let table = value.as_table().ok_or_else(|| {
        Error::Config(format!("action {position} must be a table"))
    })?;
    let kind = table
        .get("type")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Config(format!("action {position} is missing a type")))?;

    let mut action = Action::new(kind);
    for (key, value) in table {
        match key.as_str() {
            "type" => {}
            "depends_on" => match value {
                toml::Value::String(s) => action.depends_on.push(s.clone()),
                toml::Value::Array(items) => {
                    for item in items {
                        match item.as_str() {
                            Some(s) => action.depends_on.push(s.to_string()),
                            None => {
                                return Err(Error::Config(format!(
                                    "action {position} depends_on entries must be strings"
                                )))
                            }
                        }
                    }
                }
                _ => {
                    return Err(Error::Config(format!(
                        "action {position} depends_on must be a string or list"
                    )))
                }
            },
            "on_success" => {
                action.on_success = parse_nested(value, &format!("{position}.s"))?;
            }
            "on_failure" => {
                action.on_failure = parse_nested(value, &format!("{position}.f"))?;
            }
            _ => {
                action.data.insert(key.clone(), toml_to_json(value));
            }
        }
    }
    Ok(action)
}

fn parse_nested(value: &toml::Value, position: &str) -> Result<Vec<Action>> {
    let items = value.as_array().ok_or_else(|| {
        Error::Config(format!("action {position} nested actions must be an array"))
    })?;
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| parse_action(item, &format!("{position}.{}", idx + 1)))
        .collect()
}

fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Number((*i).into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_actions_require_a_type() {
        let err = parse_toml(
            r#"
[[tasks]]
name = "broken"
[[tasks.actions]]
path = "/tmp/x"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("action 1.1 is missing a type"));
    }

    #[test]
    fn toml_tasks_default_to_all_hosts() {
        let plan = parse_toml(
            r#"
[hosts.web]
connection = "local"
[hosts.db]
connection = "local"

[[tasks]]
[[tasks.actions]]
type = "exec"
name = "ping"
command = "true"
"#,
        )
        .unwrap();
        assert_eq!(plan.tasks[0].name, "task-1");
        assert_eq!(plan.tasks[0].hosts, vec!["web", "db"]);
    }

    #[test]
    fn toml_without_hosts_gets_implicit_local() {
        let plan = parse_toml("[[tasks]]\nname = \"t\"\n").unwrap();
        assert!(plan.hosts.contains_key("local"));
    }

    #[test]
    fn depends_on_accepts_scalar_and_list() {
        let plan = parse_toml(
            r#"
[[tasks]]
[[tasks.actions]]
type = "file"
path = "/tmp/a"

[[tasks.actions]]
type = "file"
path = "/tmp/b"
depends_on = "file./tmp/a"

[[tasks.actions]]
type = "file"
path = "/tmp/c"
depends_on = ["file./tmp/a", "file./tmp/b"]
"#,
        )
        .unwrap();
        let actions = &plan.tasks[0].actions;
        assert_eq!(actions[1].depends_on, vec!["file./tmp/a"]);
        assert_eq!(actions[2].depends_on.len(), 2);
    }
}
