// src/exec/isolated.rs

//! Isolated (process) pool: each job runs in a spawned worker process.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::EngineEvent;
use crate::errors::{PardagError, Result, TaskFailure};
use crate::exec::worker::{WireJob, WireResult};
use crate::exec::{JobCompletion, JobRequest, ShutdownMode, WorkerPool};
use crate::value::Value;

pub struct IsolatedPool {
    program: Arc<PathBuf>,
    semaphore: Arc<Semaphore>,
    capacity: u32,
    events_tx: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
}

impl IsolatedPool {
    /// Pool running jobs through this binary's hidden `worker`
    /// subcommand.
    pub fn new(capacity: usize, events_tx: mpsc::Sender<EngineEvent>) -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::with_program(program, capacity, events_tx))
    }

    /// Pool with an explicit worker program, used by tests.
    pub fn with_program(
        program: PathBuf,
        capacity: usize,
        events_tx: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let capacity = capacity.max(1) as u32;
        Self {
            program: Arc::new(program),
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            events_tx,
            cancel: CancellationToken::new(),
        }
    }
}

impl WorkerPool for IsolatedPool {
    fn submit(
        &mut self,
        job: JobRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let program = Arc::clone(&self.program);
        let semaphore = Arc::clone(&self.semaphore);
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.clone();

        Box::pin(async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| PardagError::Internal("isolated pool semaphore closed".into()))?;

            tokio::spawn(async move {
                let _permit = permit;
                debug!(event = "task.start", task_id = %job.task_id, attempt = job.attempt, "starting task in worker process");

                let outcome = run_in_worker(&program, &job, &cancel).await;
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
                    let _ = semaphore.acquire_many(capacity).await.map_err(|_| {
                        PardagError::Internal("isolated pool semaphore closed".into())
                    })?;
                    Ok(())
                }
                ShutdownMode::Force => {
                    // Workers are killed; their completions arrive as
                    // `cancelled` failures.
                    cancel.cancel();
                    Ok(())
                }
            }
        })
    }
}

async fn run_in_worker(
    program: &PathBuf,
    job: &JobRequest,
    cancel: &CancellationToken,
) -> std::result::Result<Value, TaskFailure> {
    let mut cmd = Command::new(program.as_path());
    cmd.arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| TaskFailure::thrown(format!("spawning worker process: {e}")))?;

    // Ship the job, then close stdin so the worker sees EOF.
    let wire = WireJob {
        function_ref: job.function_ref.clone(),
        args: job.args.clone(),
    };
    let payload = serde_json::to_vec(&wire)
        .map_err(|e| TaskFailure::thrown(format!("encoding worker job: {e}")))?;
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(&payload).await {
            let _ = child.kill().await;
            return Err(TaskFailure::thrown(format!("writing worker job: {e}")));
        }
        drop(stdin);
    }

    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill().await;
        return Err(TaskFailure::thrown("worker stdout not captured"));
    };

    // Surface worker stderr at debug level so buffers never fill.
    if let Some(stderr) = child.stderr.take() {
        let task_id = job.task_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task_id = %task_id, "worker stderr: {line}");
            }
        });
    }

    let wait = async {
        let mut out = String::new();
        stdout.read_to_string(&mut out).await?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, out))
    };

    let waited = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(TaskFailure::cancelled("run cancelled"));
        }
        res = async {
            match job.timeout {
                Some(limit) => tokio::time::timeout(limit, wait).await.ok(),
                None => Some(wait.await),
            }
        } => res,
    };

    let (status, out) = match waited {
        // Hard timeout: the worker process is killed outright.
        None => {
            let _ = child.kill().await;
            return Err(TaskFailure::timeout(format!(
                "task timed out after {:.3}s",
                job.timeout.unwrap_or_default().as_secs_f64()
            )));
        }
        Some(Ok(pair)) => pair,
        Some(Err(e)) => {
            let _ = child.kill().await;
            return Err(TaskFailure::thrown(format!("reading worker output: {e}")));
        }
    };

    if !status.success() {
        warn!(task_id = %job.task_id, code = status.code(), "worker process failed");
        return Err(TaskFailure::thrown(format!(
            "worker process exited with status {}",
            status.code().unwrap_or(-1)
        )));
    }

    match serde_json::from_str::<WireResult>(out.trim()) {
        Ok(WireResult::Ok(value)) => Ok(value),
        Ok(WireResult::Err(failure)) => Err(failure),
        Err(e) => Err(TaskFailure::thrown(format!(
            "malformed worker result: {e}"
        ))),
    }
}
