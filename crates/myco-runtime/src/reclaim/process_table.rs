//! Process-table probes: processes recognised by command line or pidfile.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, warn};

use super::{KillTarget, ReclaimProbe, ReclaimRequest};
use crate::pidfile::{self, delete_pidfile, list_pidfiles};

/// Scans every process's full command line against the sweep patterns.
///
/// Patterns are checked separately so a process matching both the service
/// binary and the build-tool pattern is reported under the first one only.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternProbe;

#[async_trait]
impl ReclaimProbe for PatternProbe {
    fn name(&self) -> &'static str {
        "process-pattern"
    }

    async fn discover(&self, request: &ReclaimRequest) -> io::Result<Vec<KillTarget>> {
        if request.patterns.is_empty() {
            return Ok(Vec::new());
        }

        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        let own_pid = std::process::id();
        let mut targets = Vec::new();

        for (pid, process) in system.processes() {
            // Linux lists threads as tasks sharing the parent's command line
            if process.thread_kind().is_some() {
                continue;
            }

            let pid = pid.as_u32();
            if pid == own_pid {
                continue;
            }

            let cmdline = pidfile::join_command(process.cmd());
            if cmdline.is_empty() {
                continue;
            }

            if let Some(pattern) = request.patterns.iter().find(|re| re.is_match(&cmdline)) {
                debug!(
                    pid = %pid,
                    pattern = %pattern,
                    cmdline = %cmdline,
                    "command line matches sweep pattern"
                );
                targets.push(KillTarget::new(pid, format!("matches /{pattern}/")));
            }
        }

        targets.sort_by_key(|target| target.pid);
        Ok(targets)
    }
}

/// Reports processes recorded in pidfiles that are still alive and still ours.
///
/// Catches dependencies orphaned by an earlier run that died before its own
/// teardown, even when they no longer hold a port. Stale files are removed.
#[derive(Debug, Clone)]
pub struct PidfileProbe {
    dir: PathBuf,
}

impl PidfileProbe {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ReclaimProbe for PidfileProbe {
    fn name(&self) -> &'static str {
        "pidfile"
    }

    async fn discover(&self, request: &ReclaimRequest) -> io::Result<Vec<KillTarget>> {
        let mut targets = Vec::new();

        for (role, data) in list_pidfiles(&self.dir)? {
            if !pidfile::pid_exists(data.pid) {
                debug!(role = %role, pid = %data.pid, "Removing stale PID file (process gone)");
                if let Err(e) = delete_pidfile(&self.dir, role) {
                    warn!(role = %role, error = %e, "Failed to remove stale PID file");
                }
                continue;
            }

            if !pidfile::is_our_process(data.pid, &data.command, &request.patterns) {
                debug!(
                    role = %role,
                    pid = %data.pid,
                    "PID reused by another process, removing PID file"
                );
                if let Err(e) = delete_pidfile(&self.dir, role) {
                    warn!(role = %role, error = %e, "Failed to remove stale PID file");
                }
                continue;
            }

            targets.push(KillTarget::new(
                data.pid,
                format!("recorded {role} (port {})", data.port),
            ));
        }

        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pidfile::{PidFileData, read_pidfile, write_pidfile};
    use myco_core::DependencyRole;
    use regex::Regex;
    use tokio::process::Command;

    #[tokio::test]
    async fn pattern_probe_finds_matching_command_line() {
        let mut child = Command::new("sleep")
            .arg("47.25")
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn sleep");
        let pid = child.id().expect("no PID");

        let request = ReclaimRequest::new(Vec::new(), vec![Regex::new(r"sleep 47\.25").unwrap()]);
        let targets = PatternProbe.discover(&request).await.unwrap();
        assert_eq!(targets.iter().filter(|t| t.pid == pid).count(), 1);
        assert!(targets.iter().all(|t| t.pid != std::process::id()));

        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn pattern_probe_without_patterns_is_noop() {
        let request = ReclaimRequest::new(vec![3002], Vec::new());
        assert!(PatternProbe.discover(&request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pidfile_probe_removes_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let data = PidFileData {
            pid: 999_999,
            port: 3004,
            command: "just server2".to_string(),
        };
        write_pidfile(dir.path(), DependencyRole::Server2, &data).unwrap();

        let probe = PidfileProbe::new(dir.path());
        let request = ReclaimRequest::new(vec![3004], Vec::new());
        assert!(probe.discover(&request).await.unwrap().is_empty());
        assert!(read_pidfile(dir.path(), DependencyRole::Server2).is_err());
    }

    #[tokio::test]
    async fn pidfile_probe_reports_live_recorded_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = Command::new("sleep")
            .arg("48")
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn sleep");
        let pid = child.id().expect("no PID");

        let data = PidFileData {
            pid,
            port: 3002,
            command: "sleep 48".to_string(),
        };
        write_pidfile(dir.path(), DependencyRole::Server1, &data).unwrap();

        let probe = PidfileProbe::new(dir.path());
        let request = ReclaimRequest::new(vec![3002], Vec::new());
        let targets = probe.discover(&request).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].pid, pid);

        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn pidfile_probe_ignores_recycled_pid() {
        let dir = tempfile::tempdir().unwrap();
        // Our own PID is alive but its command line is not the recorded one
        let data = PidFileData {
            pid: std::process::id(),
            port: 3002,
            command: "just server1 --never-this".to_string(),
        };
        write_pidfile(dir.path(), DependencyRole::Server1, &data).unwrap();

        let probe = PidfileProbe::new(dir.path());
        let request = ReclaimRequest::new(vec![3002], Vec::new());
        assert!(probe.discover(&request).await.unwrap().is_empty());
        assert!(read_pidfile(dir.path(), DependencyRole::Server1).is_err());
    }
}
