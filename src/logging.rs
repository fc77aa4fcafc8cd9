// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The engine emits one JSON record per line on stderr, with event
//! fields flattened into the record (`event`, `task_id`, `attempt`,
//! `duration_ms`, ...). stdout stays free for the human-readable result.
//!
//! Level resolution: `--log-level` flag, then the `PARDAG_LOG`
//! environment variable, then `info`. `--quiet` overrides them all.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        cli_level.map(LogLevel::as_tracing).unwrap_or_else(env_level)
    };

    fmt()
        .json()
        .flatten_event(true)
        .with_max_level(level)
        .with_target(false)
        .with_current_span(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// `PARDAG_LOG` holds a bare level name; `tracing::Level` knows how to
/// parse those. Anything unset or unparsable falls back to `info`.
fn env_level() -> Level {
    std::env::var("PARDAG_LOG")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(Level::INFO)
}
