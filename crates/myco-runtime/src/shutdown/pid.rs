//! Forceful termination by PID for processes found by reclamation probes.

use std::io;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// PIDs that must never be signalled: the kernel/init and ourselves.
pub fn is_protected_pid(pid: u32) -> bool {
    pid <= 1 || pid == std::process::id()
}

/// Send SIGKILL to `pid`.
///
/// # Differences from `shutdown_child`
/// - No `Child` handle, so **cannot reap** the process
/// - No graceful phase: reclamation only runs against processes that should already be gone
///
/// # Returns
/// - `Ok(true)` if the signal was delivered
/// - `Ok(false)` if the process was already gone or the PID is protected
/// - `Err` for anything else (typically permission denied)
pub fn force_kill(pid: u32) -> io::Result<bool> {
    if is_protected_pid(pid) {
        return Ok(false);
    }

    #[cfg(unix)]
    {
        let raw = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    #[cfg(not(unix))]
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "forceful kill by PID not implemented on this platform",
        ))
    }
}
