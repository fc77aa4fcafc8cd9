// src/engine/summary.rs

//! Run summary: per-task outcomes in completion order plus aggregates.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, TaskFailure};
use crate::value::Value;
use crate::workflow::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Terminal record for one task.
///
/// Timestamps are monotonic milliseconds since the run started;
/// `duration_ms` is the aggregate busy time across attempts. A cache hit
/// reports `attempts = 0` and `cached = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(default)]
    pub cached: bool,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub duration_ms: u64,
    /// Result value, present exactly when the task succeeded. A present
    /// JSON `null` is a real value, distinct from the field being absent.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    /// Id of the upstream task whose terminal non-success caused this
    /// skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_cause: Option<String>,
}

fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongestTask {
    pub task_id: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub counts: StatusCounts,
    pub total_attempts: u32,
    /// Tasks that needed more than one attempt.
    pub retried_tasks: usize,
    pub cache_hits: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longest_task: Option<LongestTask>,
    /// Longest root-to-leaf sum of successful task durations.
    pub critical_path_ms: u64,
    pub outcomes: Vec<TaskOutcome>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.counts.failed == 0 && self.counts.skipped == 0
    }

    /// Process exit code: 0 when everything succeeded, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            0
        } else {
            1
        }
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.task_id == task_id)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

/// Accumulates outcomes in completion order while a run executes, then
/// computes the aggregates.
#[derive(Debug)]
pub struct SummaryRecorder {
    workflow_name: String,
    started_at: DateTime<Utc>,
    outcomes: Vec<TaskOutcome>,
}

impl SummaryRecorder {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            started_at: Utc::now(),
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: TaskOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn finish(self, workflow: &Workflow) -> RunSummary {
        let mut counts = StatusCounts::default();
        let mut total_attempts = 0u32;
        let mut retried_tasks = 0usize;
        let mut cache_hits = 0usize;
        let mut longest_task: Option<LongestTask> = None;

        for o in &self.outcomes {
            match o.status {
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
            }
            total_attempts += o.attempts;
            if o.attempts > 1 {
                retried_tasks += 1;
            }
            if o.cached {
                cache_hits += 1;
            }
            if o.status == TaskStatus::Succeeded
                && longest_task
                    .as_ref()
                    .map_or(true, |l| o.duration_ms > l.duration_ms)
            {
                longest_task = Some(LongestTask {
                    task_id: o.task_id.clone(),
                    duration_ms: o.duration_ms,
                });
            }
        }

        // Completion order is a topological order over successful tasks
        // (a dep always completes before its dependent starts), so one
        // forward pass computes the critical path.
        let mut path_to: HashMap<&str, u64> = HashMap::new();
        let mut critical_path_ms = 0u64;
        for o in &self.outcomes {
            if o.status != TaskStatus::Succeeded {
                continue;
            }
            let dep_max = workflow
                .get(&o.task_id)
                .map(|spec| {
                    spec.deps
                        .iter()
                        .filter_map(|d| path_to.get(d.as_str()).copied())
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            let total = dep_max + o.duration_ms;
            path_to.insert(o.task_id.as_str(), total);
            critical_path_ms = critical_path_ms.max(total);
        }

        RunSummary {
            workflow: self.workflow_name,
            started_at: self.started_at,
            ended_at: Utc::now(),
            counts,
            total_attempts,
            retried_tasks,
            cache_hits,
            longest_task,
            critical_path_ms,
            outcomes: self.outcomes,
        }
    }
}
