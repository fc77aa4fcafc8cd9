//! Builders for workflows and engine fixtures used across tests.

use std::sync::Arc;

use tokio::sync::mpsc;

use pardag::cache::ResultCache;
use pardag::engine::{EngineConfig, EngineEvent, RunSummary, Scheduler};
use pardag::exec::shared::SharedPool;
use pardag::registry::FunctionRegistry;
use pardag::value::Value;
use pardag::workflow::{validate_workflow, TaskSpec, Workflow};

pub struct TaskBuilder {
    spec: TaskSpec,
}

impl TaskBuilder {
    pub fn new(id: &str, function_ref: &str) -> Self {
        Self {
            spec: TaskSpec::new(id, function_ref),
        }
    }

    pub fn dep(mut self, id: &str) -> Self {
        self.spec.deps.push(id.to_string());
        self
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.spec.args.push(value);
        self
    }

    /// Shorthand for a `{"ref": "<task_id>"}` argument.
    pub fn ref_arg(self, task_id: &str) -> Self {
        let mut map = std::collections::BTreeMap::new();
        map.insert("ref".to_string(), Value::Str(task_id.to_string()));
        self.arg(Value::Map(map))
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.spec.retries = n;
        self
    }

    pub fn timeout(mut self, seconds: f64) -> Self {
        self.spec.timeout = Some(seconds);
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.spec.tags.push(tag.to_string());
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.spec.cacheable = cacheable;
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

#[derive(Default)]
pub struct WorkflowBuilder {
    name: String,
    tasks: Vec<TaskSpec>,
}

impl WorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasks: Vec::new(),
        }
    }

    pub fn task(mut self, task: TaskBuilder) -> Self {
        self.tasks.push(task.build());
        self
    }

    pub fn build(self) -> Workflow {
        validate_workflow(self.name, self.tasks).expect("test workflow must validate")
    }
}

/// Run a workflow on a shared (thread) pool with the given registry.
pub async fn run_shared(
    workflow: Workflow,
    registry: FunctionRegistry,
    config: EngineConfig,
    cache: ResultCache,
) -> RunSummary {
    let (events_tx, events_rx) = mpsc::channel::<EngineEvent>(256);
    let pool = Box::new(SharedPool::new(
        Arc::new(registry),
        config.max_workers,
        events_tx,
    ));
    Scheduler::new(workflow, config, cache, pool, events_rx)
        .run()
        .await
        .expect("engine run must not error")
}
