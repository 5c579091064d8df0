//! Result rendering: one colored line per action plus a run summary.

use colored::Colorize;

use crate::ops::ActionResult;

/// Status column for a result line.
fn status(result: &ActionResult) -> &'static str {
    if result.failed {
        if result.details.to_lowercase().contains("unknown operation") {
            "unknown"
        } else {
            "failed"
        }
    } else if result.changed {
        "changed"
    } else {
        "ok"
    }
}

/// Renders one result as `host::action[resource] status - details`.
pub fn format_result(result: &ActionResult) -> String {
    let resource = result
        .resource
        .as_deref()
        .map(|r| format!("[{r}]"))
        .unwrap_or_default();
    let status = status(result);
    let line = format!(
        "{}::{}{} {} - {}",
        result.host, result.action, resource, status, result.details
    );
    match status {
        "unknown" => line.yellow().to_string(),
        "failed" => line.red().to_string(),
        "changed" => line.green().to_string(),
        _ => line.blue().to_string(),
    }
}

/// Unchanged, successful results are noise at normal verbosity.
pub fn should_display(result: &ActionResult, verbose: bool) -> bool {
    verbose || result.failed || result.changed
}

/// Aggregate counters over a run's results.
///
/// A change whose detail reads like a removal (rollback of tracked state)
/// counts separately from an addition.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub changes: usize,
    pub additions: usize,
    pub rollbacks: usize,
    pub failures: usize,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, result: &ActionResult) {
        if result.failed {
            self.failures += 1;
            return;
        }
        if !result.changed {
            return;
        }
        self.changes += 1;
        if looks_like_rollback(result) {
            self.rollbacks += 1;
        } else {
            self.additions += 1;
        }
    }

    pub fn render(&self) -> String {
        let text = format!(
            "Changes: {} | Additions: {} | Rollbacks: {} | Failures: {}",
            self.changes, self.additions, self.rollbacks, self.failures
        );
        if self.failures == 0 {
            text.green().to_string()
        } else {
            text.red().to_string()
        }
    }
}

fn looks_like_rollback(result: &ActionResult) -> bool {
    let text = result.details.to_lowercase();
    ["remove", "removed", "absent", "deleted", "stopped", "disabled"]
        .iter()
        .any(|token| text.contains(token))
}
