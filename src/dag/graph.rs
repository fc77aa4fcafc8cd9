// src/dag/graph.rs

use std::collections::{BTreeMap, HashSet};

use crate::errors::{PardagError, Result};
use crate::workflow::Workflow;

/// Lifecycle state of a task within a run.
///
/// Legal transitions:
/// - `Pending -> Ready` when all deps have succeeded
/// - `Ready -> Running` on dispatch
/// - `Running -> Succeeded` on success (including cache hits)
/// - `Running -> Ready` on a retryable failure, once the backoff elapses
/// - `Running -> Failed` on terminal failure
/// - `Pending | Ready -> Skipped` when an upstream fails or is skipped
/// - `Pending | Ready | Running -> Failed` on run cancellation
///
/// `Succeeded`, `Failed` and `Skipped` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

#[derive(Debug, Clone)]
struct Node {
    deps_left: usize,
    dependents: Vec<String>,
    state: TaskState,
}

/// In-memory DAG over a validated workflow: remaining-dependency counts,
/// dependents adjacency, and per-task state.
///
/// The scheduler is the only mutator; every transition is checked and an
/// out-of-order call surfaces as `PardagError::Internal`.
#[derive(Debug)]
pub struct TaskGraph {
    nodes: BTreeMap<String, Node>,
}

impl TaskGraph {
    /// Build from a validated workflow. Duplicate dep entries are
    /// harmless; they collapse into one edge.
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let mut nodes: BTreeMap<String, Node> = workflow
            .tasks
            .iter()
            .map(|(id, spec)| {
                let unique: HashSet<&str> = spec.deps.iter().map(|s| s.as_str()).collect();
                (
                    id.clone(),
                    Node {
                        deps_left: unique.len(),
                        dependents: Vec::new(),
                        state: TaskState::Pending,
                    },
                )
            })
            .collect();

        for (id, spec) in &workflow.tasks {
            let unique: HashSet<&str> = spec.deps.iter().map(|s| s.as_str()).collect();
            for dep in unique {
                if let Some(node) = nodes.get_mut(dep) {
                    node.dependents.push(id.clone());
                }
            }
        }

        Self { nodes }
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| PardagError::Internal(format!("unknown task '{id}' in graph")))
    }

    /// Tasks with no dependencies, transitioned to `Ready`, in id order.
    pub fn initial_ready(&mut self) -> Vec<String> {
        let mut ready = Vec::new();
        for (id, node) in &mut self.nodes {
            if node.deps_left == 0 && node.state == TaskState::Pending {
                node.state = TaskState::Ready;
                ready.push(id.clone());
            }
        }
        ready
    }

    pub fn mark_running(&mut self, id: &str) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.state != TaskState::Ready {
            return Err(PardagError::Internal(format!(
                "task '{id}' dispatched while {:?}",
                node.state
            )));
        }
        node.state = TaskState::Running;
        Ok(())
    }

    /// Record a success and return newly-ready dependents, in id order.
    pub fn mark_succeeded(&mut self, id: &str) -> Result<Vec<String>> {
        let node = self.node_mut(id)?;
        if node.state != TaskState::Running {
            return Err(PardagError::Internal(format!(
                "task '{id}' succeeded while {:?}",
                node.state
            )));
        }
        node.state = TaskState::Succeeded;
        let dependents = node.dependents.clone();

        let mut newly_ready = Vec::new();
        for dep_id in dependents {
            let dep = self.node_mut(&dep_id)?;
            dep.deps_left = dep.deps_left.saturating_sub(1);
            if dep.deps_left == 0 && dep.state == TaskState::Pending {
                dep.state = TaskState::Ready;
                newly_ready.push(dep_id);
            }
        }
        newly_ready.sort();
        Ok(newly_ready)
    }

    /// Wake a task whose retry backoff has elapsed.
    pub fn mark_retry_ready(&mut self, id: &str) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.state != TaskState::Running {
            return Err(PardagError::Internal(format!(
                "task '{id}' woke for retry while {:?}",
                node.state
            )));
        }
        node.state = TaskState::Ready;
        Ok(())
    }

    /// Record a terminal failure and transitively skip descendants.
    ///
    /// Returns the skipped ids in id order; each records `id` (the
    /// originating failure) as its skip-cause.
    pub fn mark_failed(&mut self, id: &str) -> Result<Vec<String>> {
        let node = self.node_mut(id)?;
        if node.state != TaskState::Running {
            return Err(PardagError::Internal(format!(
                "task '{id}' failed while {:?}",
                node.state
            )));
        }
        node.state = TaskState::Failed;

        let mut skipped = Vec::new();
        let mut stack = node.dependents.clone();
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(next) = stack.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            let dep = self.node_mut(&next)?;
            match dep.state {
                TaskState::Pending | TaskState::Ready => {
                    dep.state = TaskState::Skipped;
                    stack.extend(dep.dependents.iter().cloned());
                    skipped.push(next);
                }
                // Terminal already, or running with all deps satisfied:
                // nothing upstream of it can still fail.
                _ => {}
            }
        }
        skipped.sort();
        Ok(skipped)
    }

    /// Force a not-yet-terminal task to `Failed` during run cancellation.
    pub fn mark_cancelled(&mut self, id: &str) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.state.is_terminal() {
            return Err(PardagError::Internal(format!(
                "task '{id}' cancelled while terminal ({:?})",
                node.state
            )));
        }
        node.state = TaskState::Failed;
        Ok(())
    }

    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.nodes.get(id).map(|n| n.state)
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(|n| n.state.is_terminal())
    }

    /// Non-terminal task ids, in id order.
    pub fn non_terminal_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{validate_workflow, TaskSpec};

    fn workflow(edges: &[(&str, &[&str])]) -> Workflow {
        let tasks = edges
            .iter()
            .map(|(id, deps)| {
                let mut t = TaskSpec::new(*id, "math.sum");
                t.deps = deps.iter().map(|s| s.to_string()).collect();
                t
            })
            .collect();
        validate_workflow("test".into(), tasks).unwrap()
    }

    #[test]
    fn chain_readiness_advances_one_at_a_time() {
        let wf = workflow(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let mut g = TaskGraph::from_workflow(&wf);

        assert_eq!(g.initial_ready(), vec!["a"]);
        g.mark_running("a").unwrap();
        assert_eq!(g.mark_succeeded("a").unwrap(), vec!["b"]);
        g.mark_running("b").unwrap();
        assert_eq!(g.mark_succeeded("b").unwrap(), vec!["c"]);
        g.mark_running("c").unwrap();
        assert!(g.mark_succeeded("c").unwrap().is_empty());
        assert!(g.all_terminal());
    }

    #[test]
    fn diamond_joins_wait_for_both_parents() {
        let wf = workflow(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let mut g = TaskGraph::from_workflow(&wf);

        assert_eq!(g.initial_ready(), vec!["a"]);
        g.mark_running("a").unwrap();
        assert_eq!(g.mark_succeeded("a").unwrap(), vec!["b", "c"]);
        g.mark_running("b").unwrap();
        assert!(g.mark_succeeded("b").unwrap().is_empty());
        g.mark_running("c").unwrap();
        assert_eq!(g.mark_succeeded("c").unwrap(), vec!["d"]);
    }

    #[test]
    fn failure_skips_all_descendants() {
        let wf = workflow(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b"])]);
        let mut g = TaskGraph::from_workflow(&wf);

        g.initial_ready();
        g.mark_running("a").unwrap();
        assert_eq!(g.mark_failed("a").unwrap(), vec!["b", "c", "d"]);
        assert_eq!(g.state("b"), Some(TaskState::Skipped));
        assert_eq!(g.state("d"), Some(TaskState::Skipped));
        assert!(g.all_terminal());
    }

    #[test]
    fn duplicate_deps_count_once() {
        let mut b = TaskSpec::new("b", "f");
        b.deps = vec!["a".into(), "a".into()];
        let wf =
            validate_workflow("test".into(), vec![TaskSpec::new("a", "f"), b]).unwrap();
        let mut g = TaskGraph::from_workflow(&wf);
        g.initial_ready();
        g.mark_running("a").unwrap();
        assert_eq!(g.mark_succeeded("a").unwrap(), vec!["b"]);
    }

    #[test]
    fn retry_cycle_running_to_ready_to_running() {
        let wf = workflow(&[("a", &[])]);
        let mut g = TaskGraph::from_workflow(&wf);
        g.initial_ready();
        g.mark_running("a").unwrap();
        g.mark_retry_ready("a").unwrap();
        g.mark_running("a").unwrap();
        g.mark_succeeded("a").unwrap();
    }

    #[test]
    fn invalid_transition_is_an_internal_error() {
        let wf = workflow(&[("a", &[])]);
        let mut g = TaskGraph::from_workflow(&wf);
        g.initial_ready();
        let err = g.mark_succeeded("a").unwrap_err();
        assert!(matches!(err, PardagError::Internal(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn cancel_forces_failed_and_rejects_terminal() {
        let wf = workflow(&[("a", &[]), ("b", &["a"])]);
        let mut g = TaskGraph::from_workflow(&wf);
        g.initial_ready();
        g.mark_cancelled("a").unwrap();
        g.mark_cancelled("b").unwrap();
        assert!(g.mark_cancelled("a").is_err());
        assert!(g.all_terminal());
    }
}
