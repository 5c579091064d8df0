//! Exec operation: arbitrary commands behind idempotence guards.
//!
//! Without guards an exec always reports a change; `creates`, `only_if` and
//! `unless` make it convergent. Guards run as read-only probes so they fire
//! even in dry-run mode.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::{ActionResult, Operation, SpecExt};
use crate::error::{Error, Result};
use crate::executor::{CommandOutput, Executor, RunOptions};
use crate::plan::{ActionData, Host};

const OP: &str = "exec";

pub struct ExecOperation {
    name: String,
    command: Vec<String>,
    only_if: Option<Vec<String>>,
    unless: Option<Vec<String>>,
    creates: Option<PathBuf>,
    cwd: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
    allowed_returns: Vec<i32>,
    timeout: Option<Duration>,
}

impl ExecOperation {
    pub fn from_spec(spec: &ActionData) -> Result<Self> {
        let name = spec.require_str(OP, "name")?;
        let command = normalize_command(
            spec.get("command")
                .or_else(|| spec.get("cmd"))
                .ok_or_else(|| Error::operation_args(OP, "requires a command"))?,
        )?;
        let only_if = spec.get("only_if").map(normalize_command).transpose()?;
        let unless = spec.get("unless").map(normalize_command).transpose()?;

        let allowed_returns = match spec.get("returns") {
            None | Some(Value::Null) => vec![0],
            Some(Value::Number(n)) => vec![as_code(n, "returns")?],
            Some(Value::Array(items)) => {
                let mut codes = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Number(n) => codes.push(as_code(n, "returns")?),
                        _ => {
                            return Err(Error::operation_args(
                                OP,
                                "returns must be an integer or list of integers",
                            ))
                        }
                    }
                }
                codes
            }
            Some(_) => {
                return Err(Error::operation_args(
                    OP,
                    "returns must be an integer or list of integers",
                ))
            }
        };

        let timeout = spec
            .get_i64(OP, "timeout")?
            .map(|secs| {
                u64::try_from(secs)
                    .map(Duration::from_secs)
                    .map_err(|_| Error::operation_args(OP, "timeout must be non-negative"))
            })
            .transpose()?;

        Ok(Self {
            name,
            command,
            only_if,
            unless,
            creates: spec.get_path("creates"),
            cwd: spec.get_path("cwd"),
            env: normalize_env(spec)?,
            allowed_returns,
            timeout,
        })
    }

    fn guard_options(&self) -> RunOptions {
        let mut options = RunOptions::probe();
        options.env = self.env.clone();
        options.cwd = self.cwd.clone();
        options.timeout = self.timeout;
        options
    }

    fn resolve_creates(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.cwd {
            Some(cwd) => cwd.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl Operation for ExecOperation {
    fn apply(&self, host: &Host, executor: &dyn Executor) -> Result<ActionResult> {
        if let Some(creates) = &self.creates {
            let creates = self.resolve_creates(creates);
            if creates.exists() {
                return Ok(ActionResult::ok(
                    &host.name,
                    OP,
                    format!("skipped (creates {})", creates.display()),
                ));
            }
        }

        if let Some(guard) = &self.only_if {
            let output = executor.run(guard, &self.guard_options())?;
            if !output.success() {
                return Ok(ActionResult::ok(
                    &host.name,
                    OP,
                    format!("skipped (only_if rc={})", output.code),
                ));
            }
        }

        if let Some(guard) = &self.unless {
            let output = executor.run(guard, &self.guard_options())?;
            if output.success() {
                return Ok(ActionResult::ok(&host.name, OP, "skipped (unless rc=0)"));
            }
        }

        let mut options = RunOptions::default().no_check();
        options.env = self.env.clone();
        options.cwd = self.cwd.clone();
        options.timeout = self.timeout;
        let output = executor.run(&self.command, &options)?;

        if !self.allowed_returns.contains(&output.code) {
            debug!(name = %self.name, rc = output.code, command = %self.command.join(" "), "exec failed");
            return Ok(ActionResult::failed(
                &host.name,
                OP,
                error_detail(&output),
            ));
        }

        let detail = if executor.dry_run() {
            "dry-run".to_string()
        } else {
            format!("ran (rc={})", output.code)
        };
        Ok(ActionResult::changed(&host.name, OP, detail))
    }
}

/// A string command runs through the shell; a list runs verbatim.
fn normalize_command(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec!["sh".to_string(), "-c".to_string(), s.clone()]),
        Value::Array(items) => {
            let mut argv = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => argv.push(s.clone()),
                    Value::Number(n) => argv.push(n.to_string()),
                    _ => {
                        return Err(Error::operation_args(
                            OP,
                            "command list entries must be strings",
                        ))
                    }
                }
            }
            if argv.is_empty() {
                return Err(Error::operation_args(OP, "command list must not be empty"));
            }
            Ok(argv)
        }
        _ => Err(Error::operation_args(
            OP,
            "command must be a string or list",
        )),
    }
}

/// `env` accepts a map or a list of KEY=VALUE strings.
fn normalize_env(spec: &ActionData) -> Result<Option<HashMap<String, String>>> {
    let value = match spec.get("env").or_else(|| spec.get("environment")) {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };
    match value {
        Value::Object(map) => {
            let mut env = HashMap::with_capacity(map.len());
            for (key, value) in map {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                env.insert(key.clone(), value);
            }
            Ok(Some(env))
        }
        Value::Array(items) => {
            let mut env = HashMap::with_capacity(items.len());
            for item in items {
                let text = match item {
                    Value::String(s) => s.as_str(),
                    _ => {
                        return Err(Error::operation_args(
                            OP,
                            "env list entries must be KEY=VALUE strings",
                        ))
                    }
                };
                let Some((key, value)) = text.split_once('=') else {
                    return Err(Error::operation_args(
                        OP,
                        "env list entries must be KEY=VALUE",
                    ));
                };
                env.insert(key.to_string(), value.to_string());
            }
            Ok(Some(env))
        }
        _ => Err(Error::operation_args(
            OP,
            "env must be a map or a list of KEY=VALUE strings",
        )),
    }
}

fn as_code(n: &serde_json::Number, key: &str) -> Result<i32> {
    n.as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| Error::operation_args(OP, format!("{key} entries must be exit codes")))
}

fn error_detail(output: &CommandOutput) -> String {
    let prefix = format!("rc={}", output.code);
    match summarize_output(output) {
        Some(message) => format!("{prefix}: {message}"),
        None => prefix,
    }
}

/// First non-empty line of stderr (falling back to stdout), truncated.
fn summarize_output(output: &CommandOutput) -> Option<String> {
    for text in [&output.stderr, &output.stdout] {
        let stripped = text.trim();
        if stripped.is_empty() {
            continue;
        }
        let line = stripped.lines().next().unwrap_or_default();
        if line.len() > 160 {
            let cut: String = line.chars().take(157).collect();
            return Some(format!("{cut}..."));
        }
        return Some(line.to_string());
    }
    None
}
