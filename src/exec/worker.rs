// src/exec/worker.rs

//! Worker-process entry point and wire protocol for the isolated pool.
//!
//! The parent sends one [`WireJob`] as JSON on stdin; the worker answers
//! with one [`WireResult`] as JSON on stdout and exits. Values cross the
//! boundary in the same canonical form the cache uses.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::errors::TaskFailure;
use crate::registry::FunctionRegistry;
use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireJob {
    pub function_ref: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireResult {
    Ok(Value),
    Err(TaskFailure),
}

/// Body of the hidden `pardag worker` subcommand. Returns the process
/// exit code.
///
/// Failures inside the task function are reported as a `WireResult::Err`
/// with exit code 0; a non-zero exit means the worker itself broke and
/// the parent reports the attempt as thrown.
pub fn run_worker() -> i32 {
    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("pardag worker: failed to read job from stdin: {e}");
        return 1;
    }

    let result = match serde_json::from_str::<WireJob>(&input) {
        Ok(job) => run_job(&job),
        Err(e) => WireResult::Err(TaskFailure::thrown(format!("malformed worker job: {e}"))),
    };

    match serde_json::to_string(&result) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("pardag worker: failed to serialize result: {e}");
            1
        }
    }
}

fn run_job(job: &WireJob) -> WireResult {
    let registry = FunctionRegistry::with_builtins();
    let f = match registry.resolve(&job.function_ref) {
        Ok(f) => f,
        Err(_) => {
            return WireResult::Err(TaskFailure::thrown(format!(
                "unknown function '{}'",
                job.function_ref
            )))
        }
    };
    match f(&job.args) {
        Ok(value) => WireResult::Ok(value),
        Err(message) => WireResult::Err(TaskFailure::thrown(message)),
    }
}
