//! Process verification before killing a PID read back from disk.

use regex::Regex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// Full command line of `pid`, space-joined, or `None` if it is not running.
///
/// Uses `sysinfo` so the same code path works on Linux and macOS.
pub fn command_line(pid: u32) -> Option<String> {
    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );

    let process = system.process(sys_pid)?;
    Some(join_command(process.cmd()))
}

pub(crate) fn join_command(cmd: &[std::ffi::OsString]) -> String {
    cmd.iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check if a live PID still looks like the process we recorded.
///
/// Matches when its command line contains the recorded launch command or
/// matches one of the sweep patterns.
///
/// # Safety
/// Returns `false` if the process is gone or unrecognisable. This prevents
/// killing an unrelated process that inherited a recycled PID.
pub fn is_our_process(pid: u32, recorded_command: &str, patterns: &[Regex]) -> bool {
    let Some(cmdline) = command_line(pid) else {
        return false;
    };

    let recorded = recorded_command.trim();
    (!recorded.is_empty() && cmdline.contains(recorded))
        || patterns.iter().any(|re| re.is_match(&cmdline))
}

/// Check if a PID exists (without verifying it's our process).
///
/// Uses `kill` with null signal which doesn't send a signal but checks existence.
#[cfg(unix)]
pub fn pid_exists(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    // Signal None is a special "null signal" that checks if we can signal the process
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false, // No such process
        Err(_) => true,                         // Process exists but we lack permission
    }
}

#[cfg(not(unix))]
pub fn pid_exists(pid: u32) -> bool {
    command_line(pid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn pid_exists_for_self() {
        assert!(pid_exists(std::process::id()));
    }

    #[test]
    #[cfg(unix)]
    fn pid_exists_false_for_impossible_pid() {
        assert!(!pid_exists(999_999));
    }

    #[tokio::test]
    async fn recognises_process_by_recorded_command() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("31")
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn sleep");
        let pid = child.id().expect("no PID");

        assert!(is_our_process(pid, "sleep 31", &[]));
        assert!(is_our_process(pid, "", &[Regex::new(r"sle+p\s+31").unwrap()]));
        assert!(!is_our_process(pid, "rpc_server", &[Regex::new("rpc_server").unwrap()]));

        child.kill().await.unwrap();
    }

    #[test]
    fn gone_process_is_never_ours() {
        assert!(!is_our_process(999_999, "anything", &[Regex::new(".*").unwrap()]));
    }
}
