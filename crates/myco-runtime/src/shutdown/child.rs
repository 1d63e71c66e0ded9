//! Graceful shutdown of a tracked `tokio::process::Child` with SIGTERM → SIGKILL escalation.

use std::io;
use std::process::ExitStatus;

use myco_core::TeardownConfig;
use tokio::process::Child;
use tokio::time::timeout;
use tracing::debug;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::{Pid, getpgrp};

/// Shut down a tracked child, escalating from SIGTERM to SIGKILL.
///
/// # Strategy
/// 1. Send SIGTERM to the child's process group and wait up to `graceful_timeout`
/// 2. If still running, send SIGKILL and wait up to `forceful_timeout`
/// 3. If it still has not exited, give up and return `Ok(None)`
///
/// Children are spawned as process-group leaders, so signalling the group
/// also reaches whatever a wrapper (`just` → `cargo` → server) started
/// underneath. If the group cannot be signalled, the single PID is.
///
/// # Returns
/// - `Ok(Some(status))` once the process has been reaped (including if it had already exited)
/// - `Ok(None)` if it survived both waits; the caller leaves it to the reclamation sweep
/// - `Err` if the process status could not be queried
pub async fn shutdown_child(
    child: &mut Child,
    grace: &TeardownConfig,
) -> io::Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait()? {
        return Ok(Some(status));
    }

    let Some(pid) = child.id() else {
        return child.wait().await.map(Some);
    };

    #[cfg(unix)]
    if let Err(e) = signal_tree(pid, Signal::SIGTERM) {
        debug!(pid = %pid, error = %e, "SIGTERM failed");
    }

    #[cfg(not(unix))]
    if let Err(e) = child.start_kill() {
        debug!(pid = %pid, error = %e, "start_kill failed");
    }

    if let Ok(result) = timeout(grace.graceful_timeout, child.wait()).await {
        return result.map(Some);
    }
    debug!(pid = %pid, "graceful timeout elapsed, escalating to SIGKILL");

    #[cfg(unix)]
    if let Err(e) = signal_tree(pid, Signal::SIGKILL) {
        debug!(pid = %pid, error = %e, "SIGKILL failed");
    }

    // Child::start_kill also covers the case where the group signal was refused
    if let Err(e) = child.start_kill() {
        debug!(pid = %pid, error = %e, "start_kill failed");
    }

    match timeout(grace.forceful_timeout, child.wait()).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}

/// Signal the process group led by `pid`, falling back to `pid` alone.
#[cfg(unix)]
fn signal_tree(pid: u32, sig: Signal) -> io::Result<()> {
    let Ok(raw) = i32::try_from(pid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pid {pid} out of range"),
        ));
    };
    let nix_pid = Pid::from_raw(raw);

    // Never signal our own group
    if getpgrp() != nix_pid {
        match signal::killpg(nix_pid, sig) {
            Ok(()) => return Ok(()),
            Err(e) => debug!(pid = %pid, error = %e, "group signal failed, signalling pid"),
        }
    }

    match signal::kill(nix_pid, sig) {
        // Already gone
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::process::Command;
    use tokio::time::sleep;

    fn grace() -> TeardownConfig {
        TeardownConfig {
            graceful_timeout: Duration::from_secs(2),
            forceful_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn shutdown_responds_to_sigterm() {
        let mut child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .expect("failed to spawn sleep");

        let status = shutdown_child(&mut child, &grace()).await.unwrap();
        assert!(status.is_some());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn shutdown_escalates_when_sigterm_is_ignored() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 30")
            .process_group(0)
            .spawn()
            .expect("failed to spawn sh");

        // Let the shell install its trap
        sleep(Duration::from_millis(200)).await;

        let fast = TeardownConfig {
            graceful_timeout: Duration::from_millis(300),
            forceful_timeout: Duration::from_secs(2),
        };
        let status = shutdown_child(&mut child, &fast).await.unwrap();
        assert!(status.is_some());
    }

    #[tokio::test]
    async fn shutdown_handles_already_exited() {
        let mut child = Command::new("echo")
            .arg("test")
            .spawn()
            .expect("failed to spawn echo");

        // Give it time to exit
        sleep(Duration::from_millis(100)).await;

        let status = shutdown_child(&mut child, &grace()).await.unwrap();
        assert!(status.is_some());

        // Calling again on a reaped child is harmless
        let again = shutdown_child(&mut child, &grace()).await.unwrap();
        assert!(again.is_some());
    }
}
