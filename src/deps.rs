//! Dependency ordering for actions and state entries.
//!
//! Kahn's algorithm with a stable queue: zero-in-degree nodes are seeded and
//! served in declaration order, so independent items keep their declared
//! order and re-runs of the same input visit items identically. Items caught
//! in a cycle (or otherwise unresolved) are appended at the end in original
//! order; a cycle is never an error here, only an ordering hazard the caller
//! may log.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

/// Computes a dependency-respecting order over `items`, given each item's
/// identity and the identities it depends on. Returns indices into `items`.
///
/// Dependencies naming identities that are not in `items` are ignored.
pub fn order_by_dependencies(items: &[(String, Vec<String>)]) -> Vec<usize> {
    let position: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (id.as_str(), i))
        .collect();

    // Edges restricted to identities present in the current set.
    let mut in_degree = vec![0usize; items.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for (i, (_, deps)) in items.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in deps {
            let Some(&j) = position.get(dep.as_str()) else {
                continue; // dangling reference, silently ignored
            };
            if j == i || !seen.insert(j) {
                continue;
            }
            in_degree[i] += 1;
            dependents[j].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..items.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(items.len());
    while let Some(i) = queue.pop_front() {
        ordered.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if ordered.len() < items.len() {
        // Remainder is involved in a cycle; execution order for those items
        // follows declaration order.
        let placed: HashSet<usize> = ordered.iter().copied().collect();
        for i in 0..items.len() {
            if !placed.contains(&i) {
                warn!(id = %items[i].0, "dependency cycle detected, keeping declaration order");
                ordered.push(i);
            }
        }
    }
    ordered
}
