// src/workflow/validate.rs

use std::collections::{BTreeMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{PardagError, Result};
use crate::value::collect_refs;
use crate::workflow::model::{TaskSpec, Workflow};

/// Run semantic validation over parsed task specs and assemble a
/// [`Workflow`].
///
/// Checks:
/// - at least one task, non-empty ids, no duplicates
/// - every `deps` entry names an existing task, no self-deps
/// - `timeout`, when present, is positive and finite
/// - every argument reference targets a declared dependency
/// - the induced graph is acyclic
pub fn validate_workflow(name: String, tasks: Vec<TaskSpec>) -> Result<Workflow> {
    if tasks.is_empty() {
        return Err(PardagError::schema("tasks", "must be a non-empty list"));
    }

    let mut by_id: BTreeMap<String, TaskSpec> = BTreeMap::new();
    for (i, task) in tasks.iter().enumerate() {
        if task.id.trim().is_empty() {
            return Err(PardagError::schema(
                format!("tasks[{i}].id"),
                "must be a non-empty string",
            ));
        }
        if task.function_ref.trim().is_empty() {
            return Err(PardagError::schema(
                format!("tasks[{i}].fn"),
                "must be a non-empty string",
            ));
        }
        if let Some(t) = task.timeout {
            if !t.is_finite() || t <= 0.0 {
                return Err(PardagError::schema(
                    format!("tasks[{i}].timeout"),
                    "must be a positive number of seconds",
                ));
            }
        }
        if by_id.insert(task.id.clone(), task.clone()).is_some() {
            return Err(PardagError::schema(
                format!("tasks[{i}].id"),
                format!("duplicate task id '{}'", task.id),
            ));
        }
    }

    for (i, task) in tasks.iter().enumerate() {
        for (j, dep) in task.deps.iter().enumerate() {
            if !by_id.contains_key(dep) {
                return Err(PardagError::schema(
                    format!("tasks[{i}].deps[{j}]"),
                    format!("task '{}' depends on unknown task '{dep}'", task.id),
                ));
            }
            if dep == &task.id {
                return Err(PardagError::schema(
                    format!("tasks[{i}].deps[{j}]"),
                    format!("task '{}' cannot depend on itself", task.id),
                ));
            }
        }

        let declared: HashSet<&str> = task.deps.iter().map(|s| s.as_str()).collect();
        let mut refs = Vec::new();
        for arg in &task.args {
            collect_refs(arg, &mut refs);
        }
        for target in refs {
            if !declared.contains(target.as_str()) {
                return Err(PardagError::schema(
                    format!("tasks[{i}].args"),
                    format!(
                        "task '{}' references '{target}' which is not in its deps",
                        task.id
                    ),
                ));
            }
        }
    }

    check_acyclic(&by_id)?;

    Ok(Workflow { name, tasks: by_id })
}

/// Cycle detection via toposort, edge direction dep -> dependent.
fn check_acyclic(tasks: &BTreeMap<String, TaskSpec>) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in tasks.keys() {
        graph.add_node(id.as_str());
    }
    for (id, task) in tasks {
        for dep in &task.deps {
            graph.add_edge(dep.as_str(), id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(PardagError::Cycle(cycle.node_id().to_string())),
    }
}
