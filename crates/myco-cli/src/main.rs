//! CLI entry point - the composition root.
//!
//! Parses arguments, builds the configuration, installs the signal listener
//! and hands control to the [`RunController`]. This is the only place the
//! process exits with a status code.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use myco_cli::{Cli, RunController, config_from_cli, spawn_signal_listener};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok(); // Ignore error if already initialized
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads its `env` fallbacks
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let report = match config_from_cli(&cli).and_then(RunController::new) {
        Ok(controller) => {
            let shutdown = CancellationToken::new();
            let listener = spawn_signal_listener(shutdown.clone());

            let report = controller.run(shutdown.clone()).await;

            // Stop the listener if no signal arrived
            shutdown.cancel();
            if let Err(e) = listener.await {
                debug!(error = %e, "Signal listener task ended abnormally");
            }
            report
        }
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string(&report)?);
    }

    std::process::exit(report.exit_code());
}
