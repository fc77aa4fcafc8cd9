// tests/engine_chain.rs

//! Linear chain with argument references and the result cache.

mod common;

use common::builders::{run_shared, TaskBuilder, WorkflowBuilder};
use common::init_tracing;

use pardag::cache::ResultCache;
use pardag::engine::{EngineConfig, RetryPolicy, TaskStatus};
use pardag::registry::FunctionRegistry;
use pardag::value::Value;
use pardag::workflow::Workflow;

fn chain() -> Workflow {
    // a generates numbers, b sums them, c re-sums the single total.
    WorkflowBuilder::new("chain")
        .task(
            TaskBuilder::new("a", "data.gen_numbers")
                .arg(Value::Int(100))
                .arg(Value::Int(7)),
        )
        .task(TaskBuilder::new("b", "math.sum").dep("a").ref_arg("a"))
        .task(TaskBuilder::new("c", "math.sum").dep("b").arg(Value::Seq(vec![
            Value::Map(
                [("ref".to_string(), Value::Str("b".to_string()))]
                    .into_iter()
                    .collect(),
            ),
        ])))
        .build()
}

fn config() -> EngineConfig {
    EngineConfig {
        max_workers: 2,
        retry_policy: RetryPolicy::immediate(),
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn first_run_executes_then_second_run_hits_cache() {
    init_tracing();
    let cache_dir = tempfile::tempdir().unwrap();

    let first = run_shared(
        chain(),
        FunctionRegistry::with_builtins(),
        config(),
        ResultCache::at_dir(cache_dir.path()),
    )
    .await;

    assert!(first.all_succeeded());
    assert_eq!(first.cache_hits, 0);
    for id in ["a", "b", "c"] {
        let o = first.outcome(id).unwrap();
        assert_eq!(o.status, TaskStatus::Succeeded);
        assert_eq!(o.attempts, 1);
        assert!(!o.cached);
    }

    // Completion order respects the dependency chain.
    let order: Vec<&str> = first.outcomes.iter().map(|o| o.task_id.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);

    let second = run_shared(
        chain(),
        FunctionRegistry::with_builtins(),
        config(),
        ResultCache::at_dir(cache_dir.path()),
    )
    .await;

    assert!(second.all_succeeded());
    assert_eq!(second.cache_hits, 3);
    for id in ["a", "b", "c"] {
        let o = second.outcome(id).unwrap();
        assert!(o.cached, "{id} should be served from cache");
        assert_eq!(o.attempts, 0);
        // Bit-equal results across runs.
        assert_eq!(o.value, first.outcome(id).unwrap().value);
    }
}

#[tokio::test]
async fn cacheable_false_always_runs() {
    init_tracing();
    let cache_dir = tempfile::tempdir().unwrap();

    let workflow = || {
        WorkflowBuilder::new("nocache")
            .task(
                TaskBuilder::new("a", "data.gen_numbers")
                    .arg(Value::Int(10))
                    .arg(Value::Int(1))
                    .cacheable(false),
            )
            .build()
    };

    let first = run_shared(
        workflow(),
        FunctionRegistry::with_builtins(),
        config(),
        ResultCache::at_dir(cache_dir.path()),
    )
    .await;
    let second = run_shared(
        workflow(),
        FunctionRegistry::with_builtins(),
        config(),
        ResultCache::at_dir(cache_dir.path()),
    )
    .await;

    for summary in [&first, &second] {
        let o = summary.outcome("a").unwrap();
        assert_eq!(o.attempts, 1);
        assert!(!o.cached);
    }
    assert_eq!(second.cache_hits, 0);
}

#[tokio::test]
async fn disabled_cache_never_reports_hits() {
    init_tracing();

    let first = run_shared(
        chain(),
        FunctionRegistry::with_builtins(),
        config(),
        ResultCache::disabled(),
    )
    .await;
    let second = run_shared(
        chain(),
        FunctionRegistry::with_builtins(),
        config(),
        ResultCache::disabled(),
    )
    .await;

    assert!(first.all_succeeded());
    assert!(second.all_succeeded());
    assert_eq!(first.cache_hits + second.cache_hits, 0);
}
