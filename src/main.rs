// src/main.rs

use pardag::{cli, logging};

#[tokio::main]
async fn main() {
    std::process::exit(run_main().await);
}

async fn run_main() -> i32 {
    let args = cli::parse();

    match args.command {
        // Worker mode speaks a JSON protocol on stdin/stdout; no
        // logging setup so the streams stay clean.
        cli::Command::Worker => pardag::exec::worker::run_worker(),

        cli::Command::Run(run_args) => {
            if let Err(e) = logging::init_logging(run_args.log_level, run_args.quiet) {
                eprintln!("pardag: failed to initialise logging: {e:?}");
                return 3;
            }
            match pardag::run(run_args).await {
                Ok(summary) => {
                    pardag::print_result_line(&summary);
                    summary.exit_code()
                }
                Err(e) => {
                    tracing::error!(error = %e, "run aborted");
                    e.exit_code()
                }
            }
        }
    }
}
