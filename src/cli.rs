// src/cli.rs

//! CLI argument parsing using `clap`.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::errors::{PardagError, Result};

/// Command-line arguments for `pardag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pardag",
    version,
    about = "Run a DAG workflow of tasks in parallel.",
    long_about = None
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a workflow JSON file.
    Run(RunArgs),

    /// Internal: execute one job for the isolated (process) pool.
    /// Reads a job from stdin, writes the result to stdout.
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the workflow JSON file.
    pub workflow: PathBuf,

    /// Maximum number of tasks in flight at once.
    ///
    /// Default: number of hardware threads.
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,

    /// Worker pool flavour: isolated processes or shared threads.
    #[arg(long, value_enum, default_value = "process")]
    pub executor: ExecutorKind,

    /// Per-tag concurrency caps, e.g. `io=2,cpu=8`.
    #[arg(long, value_name = "TAG=N,...")]
    pub tag_limits: Option<String>,

    /// Directory for the result cache. Absent disables caching.
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Write the run summary as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub summary_json: Option<PathBuf>,

    /// Overall run timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PARDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Only log errors.
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ExecutorKind {
    /// Isolated worker processes; true parallelism, hard timeouts.
    Process,
    /// Shared worker threads; cheaper dispatch, soft timeouts.
    Thread,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

/// Parse `io=2,cpu=8` into a map. Caps are clamped to at least 1; a
/// zero cap would make its tasks unschedulable.
pub fn parse_tag_limits(s: &str) -> Result<HashMap<String, usize>> {
    let mut out = HashMap::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((tag, value)) = part.split_once('=') else {
            return Err(PardagError::schema(
                "--tag-limits",
                format!("invalid entry '{part}', expected TAG=N"),
            ));
        };
        let cap: usize = value.trim().parse().map_err(|_| {
            PardagError::schema(
                "--tag-limits",
                format!("invalid count '{}' for tag '{}'", value.trim(), tag.trim()),
            )
        })?;
        out.insert(tag.trim().to_string(), cap.max(1));
    }
    Ok(out)
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
