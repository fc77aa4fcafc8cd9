// src/engine/scheduler.rs

//! The scheduling core.
//!
//! A single task owns every piece of mutable run state: the graph, the
//! ready queue, in-flight bookkeeping with tag counters, the retry heap
//! and the summary recorder. Worker parallelism lives entirely inside
//! the pool; workers only ever talk back through the engine event
//! channel, so no state here needs locking.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::dag::TaskGraph;
use crate::engine::retry::RetryPolicy;
use crate::engine::summary::{RunSummary, SummaryRecorder, TaskOutcome, TaskStatus};
use crate::engine::EngineEvent;
use crate::errors::{FailureKind, PardagError, Result, TaskFailure};
use crate::exec::{JobCompletion, JobRequest, ShutdownMode, WorkerPool};
use crate::fingerprint::fingerprint;
use crate::value::{resolve_refs, Value};
use crate::workflow::{TaskSpec, Workflow};

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Global cap on in-flight tasks. Clamped to at least 1.
    pub max_workers: usize,
    /// Per-tag caps on in-flight tasks. Values are clamped to at least 1;
    /// a zero cap could never drain its tasks.
    pub tag_limits: HashMap<String, usize>,
    pub retry_policy: RetryPolicy,
    /// Overall run deadline. When it fires, everything not yet terminal
    /// fails as `cancelled`.
    pub run_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            tag_limits: HashMap::new(),
            retry_policy: RetryPolicy::default(),
            run_timeout: None,
        }
    }
}

pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RetryEntry {
    wake_at: Instant,
    task_id: String,
}

#[derive(Debug)]
struct InFlight {
    attempt: u32,
    dispatched_at: Instant,
    /// Fingerprint to store the result under, when cacheable and the
    /// lookup missed.
    cache_key: Option<String>,
}

#[derive(Debug, Default)]
struct TaskMeta {
    attempts: u32,
    first_started_ms: Option<u64>,
    /// Aggregate busy time across attempts.
    busy_ms: u64,
}

enum Wake {
    Event(Option<EngineEvent>),
    RetryDue,
    Deadline,
}

pub struct Scheduler {
    workflow: Workflow,
    graph: TaskGraph,
    config: EngineConfig,
    cache: ResultCache,
    pool: Box<dyn WorkerPool>,
    events_rx: mpsc::Receiver<EngineEvent>,

    ready: VecDeque<String>,
    in_flight: HashMap<String, InFlight>,
    tag_in_flight: HashMap<String, usize>,
    pending_retries: BinaryHeap<Reverse<RetryEntry>>,

    meta: HashMap<String, TaskMeta>,
    /// Successful results, kept for argument-reference resolution.
    results: HashMap<String, Value>,
    recorder: SummaryRecorder,
    run_start: Instant,
}

impl Scheduler {
    pub fn new(
        workflow: Workflow,
        mut config: EngineConfig,
        cache: ResultCache,
        pool: Box<dyn WorkerPool>,
        events_rx: mpsc::Receiver<EngineEvent>,
    ) -> Self {
        config.max_workers = config.max_workers.max(1);
        for cap in config.tag_limits.values_mut() {
            *cap = (*cap).max(1);
        }

        let graph = TaskGraph::from_workflow(&workflow);
        let recorder = SummaryRecorder::new(workflow.name.clone());

        Self {
            workflow,
            graph,
            config,
            cache,
            pool,
            events_rx,
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            tag_in_flight: HashMap::new(),
            pending_retries: BinaryHeap::new(),
            meta: HashMap::new(),
            results: HashMap::new(),
            recorder,
            run_start: Instant::now(),
        }
    }

    /// Drive the workflow to completion and return the summary.
    ///
    /// Never returns an error for task failures; those live in the
    /// outcomes. An `Err` here means the workflow could not run at all
    /// or a scheduler invariant broke.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!(
            event = "run.start",
            workflow = %self.workflow.name,
            tasks = self.workflow.len(),
            max_workers = self.config.max_workers,
            "run started"
        );

        self.run_start = Instant::now();
        for id in self.graph.initial_ready() {
            self.ready.push_back(id);
        }

        let deadline = self.config.run_timeout.map(|d| Instant::now() + d);
        let mut drained = false;

        loop {
            self.promote_due_retries()?;
            self.dispatch_ready().await?;

            if self.ready.is_empty()
                && self.in_flight.is_empty()
                && self.pending_retries.is_empty()
            {
                break;
            }

            // A head blocked on a tag cap implies an in-flight task holds
            // that tag, so there is always a completion or a retry wake
            // to wait for; this select never spins.
            let next_wake = self.pending_retries.peek().map(|Reverse(e)| e.wake_at);

            let wake = tokio::select! {
                event = self.events_rx.recv() => Wake::Event(event),
                _ = tokio::time::sleep_until(next_wake.unwrap_or_else(Instant::now)),
                    if next_wake.is_some() => Wake::RetryDue,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => Wake::Deadline,
            };

            match wake {
                Wake::Event(Some(EngineEvent::JobCompleted(completion))) => {
                    self.handle_completion(completion)?;
                }
                Wake::Event(Some(EngineEvent::CancelRequested)) => {
                    self.drain("cancel requested").await?;
                    drained = true;
                    break;
                }
                Wake::Event(None) => {
                    return Err(PardagError::Internal(
                        "engine event channel closed mid-run".into(),
                    ));
                }
                // Due entries are promoted at the top of the loop.
                Wake::RetryDue => {}
                Wake::Deadline => {
                    self.drain("run timeout").await?;
                    drained = true;
                    break;
                }
            }
        }

        if !drained {
            self.pool.shutdown(ShutdownMode::Graceful).await?;
        }

        if !self.graph.all_terminal() {
            return Err(PardagError::Internal(
                "scheduler stopped with non-terminal tasks".into(),
            ));
        }

        let recorder = std::mem::replace(&mut self.recorder, SummaryRecorder::new(""));
        let summary = recorder.finish(&self.workflow);
        info!(
            event = "run.end",
            workflow = %summary.workflow,
            succeeded = summary.counts.succeeded,
            failed = summary.counts.failed,
            skipped = summary.counts.skipped,
            cache_hits = summary.cache_hits,
            duration_ms = self.run_start.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(summary)
    }

    fn now_ms(&self) -> u64 {
        self.run_start.elapsed().as_millis() as u64
    }

    fn promote_due_retries(&mut self) -> Result<()> {
        let now = Instant::now();
        while self
            .pending_retries
            .peek()
            .is_some_and(|Reverse(e)| e.wake_at <= now)
        {
            if let Some(Reverse(entry)) = self.pending_retries.pop() {
                debug!(task_id = %entry.task_id, "retry backoff elapsed; task ready again");
                self.graph.mark_retry_ready(&entry.task_id)?;
                self.ready.push_back(entry.task_id);
            }
        }
        Ok(())
    }

    /// Admit ready tasks while the global cap allows. Heads blocked only
    /// on a saturated tag are skipped over, not removed, so a busy tag
    /// never starves tasks whose own tags are free.
    async fn dispatch_ready(&mut self) -> Result<()> {
        let mut idx = 0;
        while idx < self.ready.len() {
            if self.in_flight.len() >= self.config.max_workers {
                break;
            }
            let candidate = &self.ready[idx];
            if !self.tags_admit(candidate) {
                idx += 1;
                continue;
            }
            let id = self.ready.remove(idx).ok_or_else(|| {
                PardagError::Internal("ready queue index out of range".into())
            })?;
            self.admit(id).await?;
        }
        Ok(())
    }

    fn tags_admit(&self, id: &str) -> bool {
        let Some(spec) = self.workflow.get(id) else {
            return true;
        };
        spec.tags.iter().all(|tag| match self.config.tag_limits.get(tag) {
            Some(cap) => self.tag_in_flight.get(tag).copied().unwrap_or(0) < *cap,
            None => true,
        })
    }

    async fn admit(&mut self, id: String) -> Result<()> {
        let spec = self
            .workflow
            .get(&id)
            .cloned()
            .ok_or_else(|| PardagError::Internal(format!("unknown task '{id}' in ready queue")))?;

        // Substitute upstream results into the argument tree. Targets
        // are validated to be deps, so they are always present here.
        let mut args = Vec::with_capacity(spec.args.len());
        for (i, arg) in spec.args.iter().enumerate() {
            let resolved = resolve_refs(arg, &|task_id| self.results.get(task_id).cloned())
                .map_err(|msg| {
                    PardagError::Internal(format!("task '{id}' argument {i}: {msg}"))
                })?;
            args.push(resolved);
        }

        let mut cache_key = None;
        if spec.cacheable && self.cache.is_enabled() {
            match fingerprint(&spec.function_ref, &args) {
                Ok(key) => {
                    if let Some(value) = self.cache.lookup(&key) {
                        info!(event = "cache.hit", task_id = %id, "cache hit; skipping execution");
                        return self.complete_from_cache(&id, value);
                    }
                    cache_key = Some(key);
                }
                Err(e) => {
                    // The task still runs, it just bypasses the cache.
                    warn!(task_id = %id, error = %e, "fingerprint failed; bypassing cache");
                }
            }
        }

        self.graph.mark_running(&id)?;
        let now_ms = self.now_ms();
        let meta = self.meta.entry(id.clone()).or_default();
        meta.attempts += 1;
        if meta.first_started_ms.is_none() {
            meta.first_started_ms = Some(now_ms);
        }
        let attempt = meta.attempts;

        for tag in &spec.tags {
            *self.tag_in_flight.entry(tag.clone()).or_insert(0) += 1;
        }
        self.in_flight.insert(
            id.clone(),
            InFlight {
                attempt,
                dispatched_at: Instant::now(),
                cache_key,
            },
        );

        info!(event = "task.dispatch", task_id = %id, attempt, "dispatching task");
        self.pool
            .submit(JobRequest {
                task_id: id,
                attempt,
                function_ref: spec.function_ref.clone(),
                args,
                timeout: spec.timeout_duration(),
            })
            .await
    }

    /// Synthesize a success for a cache hit without touching the pool.
    fn complete_from_cache(&mut self, id: &str, value: Value) -> Result<()> {
        self.graph.mark_running(id)?;
        let newly_ready = self.graph.mark_succeeded(id)?;
        self.ready.extend(newly_ready);
        self.results.insert(id.to_string(), value.clone());

        let now = self.now_ms();
        self.recorder.record(TaskOutcome {
            task_id: id.to_string(),
            status: TaskStatus::Succeeded,
            attempts: 0,
            cached: true,
            started_at_ms: now,
            ended_at_ms: now,
            duration_ms: 0,
            value: Some(value),
            error: None,
            skip_cause: None,
        });
        info!(
            event = "task.end",
            task_id = %id,
            status = "succeeded",
            duration_ms = 0u64,
            "task served from cache"
        );
        Ok(())
    }

    fn release_tags(&mut self, spec: &TaskSpec) {
        for tag in &spec.tags {
            if let Some(count) = self.tag_in_flight.get_mut(tag) {
                *count = count.saturating_sub(1);
            }
        }
    }

    fn handle_completion(&mut self, completion: JobCompletion) -> Result<()> {
        let JobCompletion {
            task_id,
            attempt,
            outcome,
        } = completion;

        let in_flight = self.in_flight.remove(&task_id).ok_or_else(|| {
            PardagError::Internal(format!("completion for task '{task_id}' not in flight"))
        })?;
        if in_flight.attempt != attempt {
            return Err(PardagError::Internal(format!(
                "completion for task '{task_id}' attempt {attempt}, expected {}",
                in_flight.attempt
            )));
        }
        let spec = self
            .workflow
            .get(&task_id)
            .cloned()
            .ok_or_else(|| PardagError::Internal(format!("unknown task '{task_id}'")))?;
        self.release_tags(&spec);

        let attempt_ms = in_flight.dispatched_at.elapsed().as_millis() as u64;
        let meta = self.meta.entry(task_id.clone()).or_default();
        meta.busy_ms += attempt_ms;
        let attempts = meta.attempts;
        let started_at_ms = meta.first_started_ms.unwrap_or(0);
        let duration_ms = meta.busy_ms;

        match outcome {
            Ok(value) => {
                let newly_ready = self.graph.mark_succeeded(&task_id)?;
                self.ready.extend(newly_ready);

                if let Some(key) = in_flight.cache_key.as_deref() {
                    match self.cache.store(key, &value) {
                        Ok(()) => {
                            debug!(event = "cache.store", task_id = %task_id, "result stored in cache");
                        }
                        // The result exists either way; never fail the task.
                        Err(e) => warn!(task_id = %task_id, error = %e, "cache write failed"),
                    }
                }

                self.results.insert(task_id.clone(), value.clone());
                let ended_at_ms = self.now_ms();
                info!(
                    event = "task.end",
                    task_id = %task_id,
                    attempt = attempts,
                    status = "succeeded",
                    duration_ms = attempt_ms,
                    "task succeeded"
                );
                self.recorder.record(TaskOutcome {
                    task_id,
                    status: TaskStatus::Succeeded,
                    attempts,
                    cached: false,
                    started_at_ms,
                    ended_at_ms,
                    duration_ms,
                    value: Some(value),
                    error: None,
                    skip_cause: None,
                });
            }
            Err(failure) => {
                let max_attempts = spec.retries + 1;
                let retryable =
                    failure.kind != FailureKind::Cancelled && attempts < max_attempts;

                if retryable {
                    let delay = self.config.retry_policy.delay_before_attempt(attempts + 1);
                    warn!(
                        event = "task.retry",
                        task_id = %task_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = failure.kind.as_str(),
                        error_msg = %failure.message,
                        "attempt failed; retry scheduled"
                    );
                    // State stays Running until the backoff elapses.
                    self.pending_retries.push(Reverse(RetryEntry {
                        wake_at: Instant::now() + delay,
                        task_id,
                    }));
                } else {
                    self.fail_terminally(&task_id, failure, attempts, started_at_ms, duration_ms)?;
                }
            }
        }
        Ok(())
    }

    fn fail_terminally(
        &mut self,
        task_id: &str,
        failure: TaskFailure,
        attempts: u32,
        started_at_ms: u64,
        duration_ms: u64,
    ) -> Result<()> {
        let skipped = self.graph.mark_failed(task_id)?;
        let ended_at_ms = self.now_ms();

        warn!(
            event = "task.end",
            task_id = %task_id,
            attempt = attempts,
            status = "failed",
            error_kind = failure.kind.as_str(),
            error_msg = %failure.message,
            "task failed terminally"
        );
        self.recorder.record(TaskOutcome {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            attempts,
            cached: false,
            started_at_ms,
            ended_at_ms,
            duration_ms,
            value: None,
            error: Some(failure),
            skip_cause: None,
        });

        for skip_id in skipped {
            // A skipped task may already sit in the ready queue.
            self.ready.retain(|r| r != &skip_id);
            let now = self.now_ms();
            info!(
                event = "task.skip",
                task_id = %skip_id,
                skip_cause = %task_id,
                "skipping task due to upstream failure"
            );
            self.recorder.record(TaskOutcome {
                task_id: skip_id,
                status: TaskStatus::Skipped,
                attempts: 0,
                cached: false,
                started_at_ms: now,
                ended_at_ms: now,
                duration_ms: 0,
                value: None,
                error: None,
                skip_cause: Some(task_id.to_string()),
            });
        }
        Ok(())
    }

    /// Cancel the run: everything not yet terminal fails as `cancelled`,
    /// the pool is force-shut, and in-flight completions are collected
    /// before returning.
    async fn drain(&mut self, reason: &str) -> Result<()> {
        warn!(reason, "cancelling run");

        self.ready.clear();
        self.pending_retries.clear();

        for id in self.graph.non_terminal_ids() {
            if self.in_flight.contains_key(&id) {
                continue;
            }
            self.graph.mark_cancelled(&id)?;
            let now = self.now_ms();
            let meta = self.meta.get(&id);
            self.recorder.record(TaskOutcome {
                task_id: id.clone(),
                status: TaskStatus::Failed,
                attempts: meta.map_or(0, |m| m.attempts),
                cached: false,
                started_at_ms: meta.and_then(|m| m.first_started_ms).unwrap_or(now),
                ended_at_ms: now,
                duration_ms: meta.map_or(0, |m| m.busy_ms),
                value: None,
                error: Some(TaskFailure::cancelled(reason)),
                skip_cause: None,
            });
        }

        self.pool.shutdown(ShutdownMode::Force).await?;

        while !self.in_flight.is_empty() {
            match self.events_rx.recv().await {
                Some(EngineEvent::JobCompleted(completion)) => {
                    self.finish_cancelled(completion, reason)?;
                }
                Some(EngineEvent::CancelRequested) => {}
                None => {
                    return Err(PardagError::Internal(
                        "engine event channel closed while draining".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn finish_cancelled(&mut self, completion: JobCompletion, reason: &str) -> Result<()> {
        let JobCompletion {
            task_id, outcome, ..
        } = completion;

        let in_flight = self.in_flight.remove(&task_id).ok_or_else(|| {
            PardagError::Internal(format!("completion for task '{task_id}' not in flight"))
        })?;
        let spec = self
            .workflow
            .get(&task_id)
            .cloned()
            .ok_or_else(|| PardagError::Internal(format!("unknown task '{task_id}'")))?;
        self.release_tags(&spec);

        let attempt_ms = in_flight.dispatched_at.elapsed().as_millis() as u64;
        let meta = self.meta.entry(task_id.clone()).or_default();
        meta.busy_ms += attempt_ms;
        let attempts = meta.attempts;
        let started_at_ms = meta.first_started_ms.unwrap_or(0);
        let duration_ms = meta.busy_ms;

        // Whatever the attempt was about to report, the run is over:
        // keep a genuine failure descriptor, otherwise record the
        // cancellation.
        let failure = match outcome {
            Err(failure) => failure,
            Ok(_) => TaskFailure::cancelled(reason),
        };

        self.graph.mark_cancelled(&task_id)?;
        let ended_at_ms = self.now_ms();
        self.recorder.record(TaskOutcome {
            task_id,
            status: TaskStatus::Failed,
            attempts,
            cached: false,
            started_at_ms,
            ended_at_ms,
            duration_ms,
            value: None,
            error: Some(failure),
            skip_cause: None,
        });
        Ok(())
    }
}
