pub mod builders;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Per-test tracing, following the crate's `PARDAG_LOG` convention
/// (same variable `src/logging.rs` honours, default `info`). Output
/// goes through the test writer, so the harness only shows it for
/// failing tests.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let directives = std::env::var("PARDAG_LOG").unwrap_or_else(|_| "info".into());
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(directives))
            .with_test_writer()
            .init();
    });
}
