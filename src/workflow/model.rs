// src/workflow/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A single task as described in the workflow JSON.
///
/// Mirrors the input document:
///
/// ```json
/// {
///   "id": "count",
///   "fn": "text.count_words",
///   "args": [{"ref": "split"}],
///   "deps": ["split"],
///   "retries": 2,
///   "timeout": 30.0,
///   "tags": ["cpu"],
///   "cacheable": true
/// }
/// ```
///
/// All fields except `id` and `fn` are optional and default as shown in
/// [`default_cacheable`] and the serde attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,

    /// Opaque identifier resolved by the function registry.
    #[serde(rename = "fn")]
    pub function_ref: String,

    /// Ordered argument list. Elements may contain `{"ref": "<task_id>"}`
    /// references to upstream results anywhere in their tree.
    #[serde(default)]
    pub args: Vec<Value>,

    /// Ids of tasks that must succeed before this one runs.
    #[serde(default)]
    pub deps: Vec<String>,

    /// Additional attempts after the first (total attempts = retries + 1).
    #[serde(default)]
    pub retries: u32,

    /// Per-attempt timeout in seconds. Absent means unbounded.
    #[serde(default)]
    pub timeout: Option<f64>,

    /// Resource tags driving per-tag concurrency caps.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
}

pub(crate) fn default_cacheable() -> bool {
    true
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, function_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function_ref: function_ref.into(),
            args: Vec::new(),
            deps: Vec::new(),
            retries: 0,
            timeout: None,
            tags: Vec::new(),
            cacheable: true,
        }
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs_f64)
    }
}

/// Raw top-level document shape, before semantic validation.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WorkflowDoc {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tasks: Vec<serde_json::Value>,
}

/// A validated workflow: unique ids, known deps, acyclic.
///
/// Construct via [`crate::workflow::parse_workflow`] or
/// [`crate::workflow::validate_workflow`]; read-only afterwards.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub tasks: BTreeMap<String, TaskSpec>,
}

impl Workflow {
    pub fn get(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
