//! External tool presence and version extraction.

use std::process::Command;

use myco_core::TaskRunnerSpec;

/// Run `cmd` with `args` and return the first line it prints, if it succeeds.
pub fn get_command_version(cmd: &str, args: &[String]) -> Option<String> {
    let output = Command::new(cmd).args(args).output().ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    // Try stdout first, fall back to stderr (some tools output to stderr)
    let text = if stdout.trim().is_empty() {
        stderr
    } else {
        stdout
    };

    Some(text.lines().next().map(|s| s.trim().to_string()).unwrap_or_default())
}

/// Version line of the task runner, or `None` if it is missing or broken.
pub fn task_runner_version(runner: &TaskRunnerSpec) -> Option<String> {
    get_command_version(&runner.program, &runner.version_args)
}
