//! Command-line arguments for `run-myco`.
//!
//! Every flag is optional; anything not given falls back to
//! [`HarnessConfig::with_defaults`](myco_core::HarnessConfig::with_defaults).

use std::path::PathBuf;

use clap::Parser;

/// Start Server2 and Server1, run the latency client against them, and
/// leave no process or port behind.
#[derive(Debug, Parser)]
#[command(name = "run-myco")]
#[command(about = "Run the latency client against freshly started Server1/Server2 instances")]
#[command(version)]
pub struct Cli {
    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Print the final run report as a JSON line
    #[arg(long)]
    pub json: bool,

    /// Directory containing the justfile (defaults to the current directory)
    #[arg(long = "working-dir", env = "MYCO_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    /// Task runner used to launch the services and the client
    #[arg(long = "task-runner", env = "MYCO_TASK_RUNNER")]
    pub task_runner: Option<String>,

    /// Port Server1 listens on
    #[arg(long = "server1-port", env = "MYCO_SERVER1_PORT")]
    pub server1_port: Option<u16>,

    /// Port Server2 listens on
    #[arg(long = "server2-port", env = "MYCO_SERVER2_PORT")]
    pub server2_port: Option<u16>,

    /// Seconds to wait for Server2's readiness marker
    #[arg(long = "server2-timeout", value_name = "SECS")]
    pub server2_timeout: Option<u64>,

    /// Seconds to wait for Server1's readiness marker
    #[arg(long = "server1-timeout", value_name = "SECS")]
    pub server1_timeout: Option<u64>,
}
