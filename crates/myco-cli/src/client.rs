//! The foreground client run.

use std::path::Path;
use std::process::Stdio;

use myco_core::{HarnessError, LaunchSpec};
use myco_runtime::ChildOutput;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Launch the client as the leader of its own process group.
///
/// The caller keeps the [`Child`] so an interrupt can signal the whole group,
/// including anything a wrapper such as `just` started underneath.
pub fn spawn_client(launch: &LaunchSpec, working_dir: &Path) -> Result<Child, HarnessError> {
    info!(command = %launch.display(), "Starting client");

    let mut cmd = Command::new(&launch.program);
    cmd.args(&launch.args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|e| {
        HarnessError::ClientFailure(format!("failed to launch '{}': {e}", launch.display()))
    })
}

/// Stream the client's output until it closes, then check its exit status.
///
/// Dropping this future leaves the child untouched; stopping it is up to
/// whoever owns it.
pub async fn wait_client(child: &mut Child) -> Result<(), HarnessError> {
    let mut output = ChildOutput::from_child(child);
    while let Some(line) = output.next_line_until_closed().await {
        println!("   Client: {}", String::from_utf8_lossy(&line));
    }

    let status = child
        .wait()
        .await
        .map_err(|e| HarnessError::ClientFailure(format!("failed to wait for client: {e}")))?;
    debug!(%status, "Client exited");

    if status.success() {
        Ok(())
    } else {
        Err(HarnessError::ClientFailure(format!("client exited with {status}")))
    }
}
