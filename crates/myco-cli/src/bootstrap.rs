//! CLI bootstrap - turns arguments into a validated [`HarnessConfig`] and
//! checks the environment before anything is launched.

use std::path::PathBuf;
use std::time::Duration;

use myco_core::{HarnessConfig, HarnessError};
use myco_runtime::task_runner_version;
use tracing::debug;

use crate::parser::Cli;

/// Build the run configuration from parsed arguments.
pub fn config_from_cli(cli: &Cli) -> Result<HarnessConfig, HarnessError> {
    let working_dir = match &cli.working_dir {
        Some(dir) => dir.clone(),
        None => current_dir()?,
    };

    let mut config = HarnessConfig::with_defaults(working_dir);

    if let Some(runner) = &cli.task_runner {
        config.task_runner.program.clone_from(runner);
        config.server2.launch.program.clone_from(runner);
        config.server1.launch.program.clone_from(runner);
        config.client.program.clone_from(runner);
    }
    if let Some(port) = cli.server1_port {
        config.server1.port = port;
    }
    if let Some(port) = cli.server2_port {
        config.server2.port = port;
    }
    if let Some(secs) = cli.server2_timeout {
        config.server2.startup_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.server1_timeout {
        config.server1.startup_timeout = Duration::from_secs(secs);
    }

    config.validate()?;
    Ok(config)
}

fn current_dir() -> Result<PathBuf, HarnessError> {
    std::env::current_dir().map_err(|e| {
        HarnessError::Configuration(format!("Cannot determine the working directory: {e}"))
    })
}

/// Check the declaration file and the task runner.
///
/// Returns the task runner's version line.
pub fn verify_preconditions(config: &HarnessConfig) -> Result<String, HarnessError> {
    let declaration = config.declaration_path();
    if !declaration.is_file() {
        return Err(HarnessError::Configuration(format!(
            "{} not found. Run from the project root or pass --working-dir.",
            declaration.display()
        )));
    }

    let runner = &config.task_runner;
    let version = task_runner_version(runner).ok_or_else(|| {
        HarnessError::Configuration(format!(
            "'{}' is not installed or not working. Install it with: {}",
            runner.program, runner.install_hint
        ))
    })?;

    debug!(runner = %runner.program, version = %version, "Task runner found");
    Ok(version)
}
