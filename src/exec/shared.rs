// src/exec/shared.rs

//! Shared (thread) pool: jobs run on blocking threads in this process.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::EngineEvent;
use crate::errors::{FailureKind, PardagError, Result, TaskFailure};
use crate::exec::{JobCompletion, JobRequest, ShutdownMode, WorkerPool};
use crate::registry::FunctionRegistry;
use crate::value::Value;

pub struct SharedPool {
    registry: Arc<FunctionRegistry>,
    semaphore: Arc<Semaphore>,
    capacity: u32,
    events_tx: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
}

impl SharedPool {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        capacity: usize,
        events_tx: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let capacity = capacity.max(1) as u32;
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            events_tx,
            cancel: CancellationToken::new(),
        }
    }
}

impl WorkerPool for SharedPool {
    fn submit(
        &mut self,
        job: JobRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let registry = Arc::clone(&self.registry);
        let semaphore = Arc::clone(&self.semaphore);
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.clone();

        Box::pin(async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| PardagError::Internal("shared pool semaphore closed".into()))?;

            tokio::spawn(async move {
                let _permit = permit;
                debug!(event = "task.start", task_id = %job.task_id, attempt = job.attempt, "starting task on shared pool");

                let outcome = tokio::select! {
                    _ = cancel.cancelled() => {
                        Err(TaskFailure::cancelled("run cancelled"))
                    }
                    res = execute(&registry, &job) => res,
                };

                let _ = events_tx
                    .send(EngineEvent::JobCompleted(JobCompletion {
                        task_id: job.task_id,
                        attempt: job.attempt,
                        outcome,
                    }))
                    .await;
            });

            Ok(())
        })
    }

    fn shutdown(
        &mut self,
        mode: ShutdownMode,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let semaphore = Arc::clone(&self.semaphore);
        let capacity = self.capacity;
        let cancel = self.cancel.clone();

        Box::pin(async move {
            match mode {
                ShutdownMode::Graceful => {
                    // All permits free again means no job is in flight.
                    let _ = semaphore
                        .acquire_many(capacity)
                        .await
                        .map_err(|_| PardagError::Internal("shared pool semaphore closed".into()))?;
                    Ok(())
                }
                ShutdownMode::Force => {
                    // Request cancellation; completions drain through the
                    // event channel as `cancelled` failures. Blocking
                    // closures already on a thread cannot be interrupted
                    // and are abandoned.
                    cancel.cancel();
                    Ok(())
                }
            }
        })
    }
}

async fn execute(
    registry: &FunctionRegistry,
    job: &JobRequest,
) -> std::result::Result<Value, TaskFailure> {
    let f = match registry.resolve(&job.function_ref) {
        Ok(f) => f,
        // Refs are validated before the run starts; this is defensive.
        Err(_) => {
            return Err(TaskFailure::thrown(format!(
                "unknown function '{}'",
                job.function_ref
            )))
        }
    };

    let args = job.args.clone();
    let handle = tokio::task::spawn_blocking(move || f(&args));

    let joined = match job.timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            // Soft timeout: the blocking thread keeps running, but the
            // attempt is resolved as timed out.
            Err(_) => {
                return Err(TaskFailure::timeout(format!(
                    "task timed out after {:.3}s",
                    limit.as_secs_f64()
                )))
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(TaskFailure::thrown(message)),
        Err(join_err) => Err(TaskFailure {
            kind: FailureKind::Thrown,
            message: "task function panicked".to_string(),
            traceback: Some(join_err.to_string()),
        }),
    }
}
