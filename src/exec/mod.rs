// src/exec/mod.rs

//! Executor pools.
//!
//! The scheduler talks to a [`WorkerPool`] instead of a concrete
//! executor, so tests can substitute a fake that completes jobs without
//! running anything. Completions are not returned from `submit`; every
//! pool delivers them to the scheduler as
//! [`crate::engine::EngineEvent::JobCompleted`] messages on the engine's
//! event channel.
//!
//! Two implementations:
//! - [`shared::SharedPool`]: jobs run on blocking threads inside this
//!   process; cheap dispatch, soft timeouts. For I/O-bound tasks.
//! - [`isolated::IsolatedPool`]: each job runs in a spawned worker
//!   process; arguments and results cross the boundary as canonical
//!   JSON, timeouts and cancellation kill the child. For CPU-bound
//!   tasks.

pub mod isolated;
pub mod shared;
pub mod worker;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::{Result, TaskFailure};
use crate::value::Value;

/// A unit of work handed to a pool: one attempt of one task, with
/// argument references already resolved.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub task_id: String,
    pub attempt: u32,
    pub function_ref: String,
    pub args: Vec<Value>,
    pub timeout: Option<Duration>,
}

/// Resolution of one submitted attempt.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub task_id: String,
    pub attempt: u32,
    pub outcome: std::result::Result<Value, TaskFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Wait for in-flight jobs to finish.
    Graceful,
    /// Request cancellation of in-flight jobs; their completions arrive
    /// on the event channel as `cancelled` failures (best-effort for
    /// blocking threads, a kill for worker processes).
    Force,
}

/// Bounded pool of workers.
///
/// Both implementations cap concurrent submissions with a FIFO
/// semaphore sized to the global worker cap; the scheduler additionally
/// never submits beyond that cap, so `submit` does not block in
/// practice.
pub trait WorkerPool: Send {
    fn submit(&mut self, job: JobRequest)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn shutdown(
        &mut self,
        mode: ShutdownMode,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
