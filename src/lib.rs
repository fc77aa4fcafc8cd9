// src/lib.rs

pub mod cache;
pub mod cli;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fingerprint;
pub mod logging;
pub mod registry;
pub mod tasks;
pub mod value;
pub mod workflow;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::cache::ResultCache;
use crate::cli::{ExecutorKind, RunArgs};
use crate::engine::{
    default_max_workers, EngineConfig, EngineEvent, RetryPolicy, RunSummary, Scheduler,
};
use crate::errors::{PardagError, Result};
use crate::exec::isolated::IsolatedPool;
use crate::exec::shared::SharedPool;
use crate::exec::WorkerPool;
use crate::registry::FunctionRegistry;
use crate::workflow::Workflow;

/// High-level entry point used by `main.rs`.
///
/// Wires together workflow loading, the function registry, the cache,
/// the chosen pool, Ctrl-C handling and the scheduler.
pub async fn run(args: RunArgs) -> Result<RunSummary> {
    let workflow = workflow::load_workflow(&args.workflow)?;
    let registry = Arc::new(FunctionRegistry::with_builtins());
    ensure_functions_known(&workflow, &registry)?;

    let max_workers = args.max_workers.unwrap_or_else(default_max_workers).max(1);
    let tag_limits: HashMap<String, usize> = match &args.tag_limits {
        Some(s) => cli::parse_tag_limits(s)?,
        None => HashMap::new(),
    };
    let run_timeout = match args.timeout {
        Some(t) if t.is_finite() && t > 0.0 => Some(Duration::from_secs_f64(t)),
        Some(_) => {
            return Err(PardagError::schema(
                "--timeout",
                "must be a positive number of seconds",
            ))
        }
        None => None,
    };

    let cache = match &args.cache_dir {
        Some(dir) => ResultCache::at_dir(dir),
        None => ResultCache::disabled(),
    };

    let (events_tx, events_rx) = mpsc::channel::<EngineEvent>(64);

    let pool: Box<dyn WorkerPool> = match args.executor {
        ExecutorKind::Process => Box::new(IsolatedPool::new(max_workers, events_tx.clone())?),
        ExecutorKind::Thread => Box::new(SharedPool::new(
            Arc::clone(&registry),
            max_workers,
            events_tx.clone(),
        )),
    };

    // Ctrl-C requests cancellation; the scheduler drains and still
    // emits a summary.
    {
        let tx = events_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(EngineEvent::CancelRequested).await;
            }
        });
    }

    let config = EngineConfig {
        max_workers,
        tag_limits,
        retry_policy: RetryPolicy::default(),
        run_timeout,
    };

    let scheduler = Scheduler::new(workflow, config, cache, pool, events_rx);
    let summary = scheduler.run().await?;

    if let Some(path) = &args.summary_json {
        summary.write_json(path)?;
    }

    Ok(summary)
}

/// Every `fn` string must resolve before the run starts.
fn ensure_functions_known(workflow: &Workflow, registry: &FunctionRegistry) -> Result<()> {
    for (id, spec) in &workflow.tasks {
        if !registry.contains(&spec.function_ref) {
            tracing::error!(task_id = %id, function = %spec.function_ref, "unknown function");
            return Err(PardagError::UnknownFunction(spec.function_ref.clone()));
        }
    }
    Ok(())
}

/// Short human-readable result on stdout; the JSON log stream stays on
/// stderr.
pub fn print_result_line(summary: &RunSummary) {
    println!("Workflow: {}", summary.workflow);
    println!("Cache: hits={}", summary.cache_hits);
    println!(
        "Tasks: succeeded={} failed={} skipped={}",
        summary.counts.succeeded, summary.counts.failed, summary.counts.skipped
    );
}
