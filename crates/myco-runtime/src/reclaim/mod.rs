//! Best-effort port reclamation.
//!
//! Finds processes holding the managed ports, or whose command lines mark
//! them as leftover service instances, and SIGKILLs them. Every probe is
//! independent: one that cannot run (missing tool, no permission) is logged
//! and skipped, and nothing here ever returns an error to the caller.

mod process_table;
mod socket_table;

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use myco_core::{PortBinding, ReclaimConfig};
use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::shutdown::{force_kill, is_protected_pid};

pub use process_table::{PatternProbe, PidfileProbe};
pub use socket_table::{LsofProbe, NetstatProbe, is_port_bindable};

/// A process a probe wants killed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillTarget {
    pub pid: u32,
    /// Human-readable reason, for logs.
    pub reason: String,
}

impl KillTarget {
    pub fn new(pid: u32, reason: impl Into<String>) -> Self {
        Self {
            pid,
            reason: reason.into(),
        }
    }
}

/// What one reclamation pass is looking for.
#[derive(Debug, Clone)]
pub struct ReclaimRequest {
    pub ports: Vec<u16>,
    pub patterns: Vec<Regex>,
}

impl ReclaimRequest {
    pub const fn new(ports: Vec<u16>, patterns: Vec<Regex>) -> Self {
        Self { ports, patterns }
    }
}

/// One independent discovery strategy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReclaimProbe: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Find processes to kill. Errors mean "this probe could not run".
    async fn discover(&self, request: &ReclaimRequest) -> io::Result<Vec<KillTarget>>;
}

/// Outcome of a reclamation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// True if at least one signal was delivered.
    pub any_killed: bool,
    pub killed: Vec<KillTarget>,
}

impl ReclaimReport {
    fn merge(&mut self, other: Self) {
        self.any_killed |= other.any_killed;
        self.killed.extend(other.killed);
    }
}

/// Frees ports by killing whoever holds them.
pub struct PortReclaimer {
    probes: Vec<Box<dyn ReclaimProbe>>,
    /// Pattern-only probe used by the forceful sweep in [`escalate`](Self::escalate).
    sweeper: Box<dyn ReclaimProbe>,
    socket_table: LsofProbe,
    config: ReclaimConfig,
}

impl PortReclaimer {
    /// The standard probe set: lsof, netstat, process patterns, pidfiles in `pid_dir`.
    pub fn new(config: ReclaimConfig, pid_dir: impl Into<PathBuf>) -> Self {
        Self::with_probes(
            config,
            vec![
                Box::new(LsofProbe::default()),
                Box::new(NetstatProbe::default()),
                Box::new(PatternProbe),
                Box::new(PidfileProbe::new(pid_dir)),
            ],
        )
    }

    /// Use a custom probe list, run in the given order.
    pub fn with_probes(config: ReclaimConfig, probes: Vec<Box<dyn ReclaimProbe>>) -> Self {
        Self {
            probes,
            sweeper: Box::new(PatternProbe),
            socket_table: LsofProbe::default(),
            config,
        }
    }

    /// Replace the socket-table query used by [`ports_are_free`](Self::ports_are_free).
    #[must_use]
    pub fn with_socket_table(mut self, socket_table: LsofProbe) -> Self {
        self.socket_table = socket_table;
        self
    }

    /// Replace the probe used by the forceful sweep.
    #[must_use]
    pub fn with_sweeper(mut self, sweeper: Box<dyn ReclaimProbe>) -> Self {
        self.sweeper = sweeper;
        self
    }

    /// One reclamation pass over every probe.
    ///
    /// # Strategy
    /// 1. Run each probe in order; a failing probe is logged and skipped
    /// 2. SIGKILL each target it reports, pausing `kill_pause` after each kill
    /// 3. If anything was killed, sleep `settle_delay` so sockets are released
    pub async fn reclaim(&self, ports: &[u16], patterns: &[Regex]) -> ReclaimReport {
        let request = ReclaimRequest::new(ports.to_vec(), patterns.to_vec());
        let mut report = ReclaimReport::default();

        for probe in &self.probes {
            report.merge(self.run_probe(probe.as_ref(), &request).await);
        }

        if report.any_killed {
            info!(
                killed = report.killed.len(),
                "Reclamation killed processes, letting sockets settle"
            );
            sleep(self.config.settle_delay).await;
        }

        report
    }

    /// Kill everything matching `patterns`, regardless of ports.
    pub async fn sweep_patterns(&self, patterns: &[Regex]) -> ReclaimReport {
        let request = ReclaimRequest::new(Vec::new(), patterns.to_vec());
        self.run_probe(self.sweeper.as_ref(), &request).await
    }

    /// Second tier: forceful pattern sweep, a pause, then a full pass.
    pub async fn escalate(&self, ports: &[u16], patterns: &[Regex]) -> ReclaimReport {
        warn!(ports = ?ports, "Ports still busy, escalating reclamation");

        let mut report = self.sweep_patterns(patterns).await;
        sleep(self.config.escalation_pause).await;
        report.merge(self.reclaim(ports, patterns).await);
        report
    }

    /// Read-only: true if no process is seen holding any of `ports`.
    ///
    /// When the socket-table tool cannot run, a local bind attempt decides.
    pub async fn ports_are_free(&self, ports: &[u16]) -> bool {
        for &port in ports {
            match self.socket_table.owners(port).await {
                Ok(pids) if pids.is_empty() => {}
                Ok(pids) => {
                    debug!(port = %port, pids = ?pids, "Port is held");
                    return false;
                }
                Err(e) => {
                    debug!(port = %port, error = %e, "Socket table unavailable, trying a bind");
                    if !is_port_bindable(port) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Current owner of each port, recomputed on every call.
    ///
    /// Ports the socket-table tool could not answer for are reported
    /// without an owner.
    pub async fn port_bindings(&self, ports: &[u16]) -> Vec<PortBinding> {
        let mut bindings = Vec::with_capacity(ports.len());
        for &port in ports {
            let pid = match self.socket_table.owners(port).await {
                Ok(pids) => pids.into_iter().next(),
                Err(e) => {
                    debug!(port = %port, error = %e, "Socket table unavailable");
                    None
                }
            };
            bindings.push(PortBinding { port, pid });
        }
        bindings
    }

    async fn run_probe(&self, probe: &dyn ReclaimProbe, request: &ReclaimRequest) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        let targets = match probe.discover(request).await {
            Ok(targets) => targets,
            Err(e) => {
                debug!(probe = probe.name(), error = %e, "Probe unavailable, skipping");
                return report;
            }
        };

        let mut seen = HashSet::new();
        for target in targets {
            if !seen.insert(target.pid) || is_protected_pid(target.pid) {
                continue;
            }

            match force_kill(target.pid) {
                Ok(true) => {
                    info!(
                        probe = probe.name(),
                        pid = %target.pid,
                        reason = %target.reason,
                        "Killed process"
                    );
                    report.any_killed = true;
                    report.killed.push(target);
                    sleep(self.config.kill_pause).await;
                }
                Ok(false) => {
                    debug!(probe = probe.name(), pid = %target.pid, "Process already gone");
                }
                Err(e) => {
                    warn!(
                        probe = probe.name(),
                        pid = %target.pid,
                        error = %e,
                        "Failed to kill process"
                    );
                }
            }
        }

        report
    }
}
