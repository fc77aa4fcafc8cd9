// tests/engine_retry.rs

//! Retry/backoff behaviour and failure propagation through the DAG.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::builders::{run_shared, TaskBuilder, WorkflowBuilder};
use common::init_tracing;

use pardag::cache::ResultCache;
use pardag::engine::{EngineConfig, RetryPolicy, TaskStatus};
use pardag::errors::FailureKind;
use pardag::registry::FunctionRegistry;
use pardag::value::Value;

fn config() -> EngineConfig {
    EngineConfig {
        max_workers: 4,
        retry_policy: RetryPolicy::immediate(),
        ..EngineConfig::default()
    }
}

/// Registry with a function that fails its first `fail_count` calls.
fn flaky_registry(fail_count: u32) -> (FunctionRegistry, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = FunctionRegistry::new();
    let counter = Arc::clone(&calls);
    registry.register("flaky", move |_args: &[Value]| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= fail_count {
            Err(format!("injected failure on call {n}"))
        } else {
            Ok(Value::Int(123))
        }
    });
    registry.register("ok", |_args: &[Value]| Ok(Value::Int(1)));
    (registry, calls)
}

#[tokio::test]
async fn task_retries_until_it_succeeds() {
    init_tracing();
    let (registry, calls) = flaky_registry(2);

    let workflow = WorkflowBuilder::new("retry")
        .task(TaskBuilder::new("x", "flaky").retries(2))
        .build();

    let summary = run_shared(workflow, registry, config(), ResultCache::disabled()).await;

    let o = summary.outcome("x").unwrap();
    assert_eq!(o.status, TaskStatus::Succeeded);
    assert_eq!(o.attempts, 3);
    assert_eq!(o.value, Some(Value::Int(123)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(summary.retried_tasks, 1);
    assert_eq!(summary.total_attempts, 3);
}

#[tokio::test]
async fn exhausted_retries_fail_and_skip_dependents() {
    init_tracing();
    let (registry, calls) = flaky_registry(u32::MAX);

    let workflow = WorkflowBuilder::new("exhausted")
        .task(TaskBuilder::new("a", "flaky").retries(2))
        .task(TaskBuilder::new("b", "ok").dep("a"))
        .task(TaskBuilder::new("c", "ok").dep("a"))
        .build();

    let summary = run_shared(workflow, registry, config(), ResultCache::disabled()).await;

    let a = summary.outcome("a").unwrap();
    assert_eq!(a.status, TaskStatus::Failed);
    assert_eq!(a.attempts, 3);
    assert_eq!(a.error.as_ref().unwrap().kind, FailureKind::Thrown);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    for id in ["b", "c"] {
        let o = summary.outcome(id).unwrap();
        assert_eq!(o.status, TaskStatus::Skipped);
        assert_eq!(o.attempts, 0);
        assert_eq!(o.skip_cause.as_deref(), Some("a"));
    }

    assert_eq!(summary.counts.failed, 1);
    assert_eq!(summary.counts.skipped, 2);
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn zero_retries_means_a_single_attempt() {
    init_tracing();
    let (registry, calls) = flaky_registry(u32::MAX);

    let workflow = WorkflowBuilder::new("once")
        .task(TaskBuilder::new("a", "flaky"))
        .build();

    let summary = run_shared(workflow, registry, config(), ResultCache::disabled()).await;

    assert_eq!(summary.outcome("a").unwrap().attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn skip_cascades_transitively_with_the_originating_cause() {
    init_tracing();
    let (registry, _) = flaky_registry(u32::MAX);

    // a -> b -> d, a -> c
    let workflow = WorkflowBuilder::new("cascade")
        .task(TaskBuilder::new("a", "flaky"))
        .task(TaskBuilder::new("b", "ok").dep("a"))
        .task(TaskBuilder::new("c", "ok").dep("a"))
        .task(TaskBuilder::new("d", "ok").dep("b"))
        .build();

    let summary = run_shared(workflow, registry, config(), ResultCache::disabled()).await;

    for id in ["b", "c", "d"] {
        let o = summary.outcome(id).unwrap();
        assert_eq!(o.status, TaskStatus::Skipped, "{id}");
        assert_eq!(o.skip_cause.as_deref(), Some("a"), "{id}");
    }
}
