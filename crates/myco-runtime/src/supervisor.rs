//! Ownership of dependency processes from launch to teardown.
//!
//! The supervisor is the only place a dependency's `Child` lives. It starts
//! one role at a time, gated on its readiness marker, and on teardown stops
//! everything it still tracks before running a reclamation pass.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use myco_core::{
    ConfigError, DependencyRole, DependencySpec, HarnessConfig, LaunchSpec, ReadinessOutcome,
    StartError, TeardownConfig,
};
use regex::Regex;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::output::{ChildOutput, spawn_forwarder};
use crate::pidfile::{PidFileData, delete_pidfile, write_pidfile};
use crate::readiness::{ReadinessWatch, wait_for_ready};
use crate::reclaim::{PortReclaimer, ReclaimReport};
use crate::shutdown::shutdown_child;

/// A dependency the supervisor launched and must tear down.
struct TrackedProcess {
    pid: Option<u32>,
    launch: LaunchSpec,
    child: Child,
    /// Output pipes until readiness; afterwards owned by `forwarder`.
    output: Option<ChildOutput>,
    forwarder: Option<JoinHandle<()>>,
    exit_status: Option<ExitStatus>,
}

/// A dependency that printed its readiness marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedDependency {
    pub role: DependencyRole,
    pub pid: Option<u32>,
    pub port: u16,
}

/// What one teardown did.
#[derive(Debug, Default)]
pub struct TeardownSummary {
    /// Roles confirmed gone, with their exit status.
    pub stopped: Vec<(DependencyRole, ExitStatus)>,
    /// Roles that survived SIGKILL and stay tracked for the next attempt.
    pub lingering: Vec<DependencyRole>,
    pub reclaim: ReclaimReport,
}

pub struct ProcessSupervisor {
    tracked: BTreeMap<DependencyRole, TrackedProcess>,
    reclaimer: Arc<PortReclaimer>,
    working_dir: PathBuf,
    pid_dir: PathBuf,
    ports: Vec<u16>,
    patterns: Vec<Regex>,
    poll_interval: Duration,
    teardown: TeardownConfig,
    teardown_passes: u32,
}

impl ProcessSupervisor {
    /// Create a supervisor for `config`, sharing `reclaimer` with the caller.
    pub fn new(config: &HarnessConfig, reclaimer: Arc<PortReclaimer>) -> Result<Self, ConfigError> {
        Ok(Self {
            tracked: BTreeMap::new(),
            reclaimer,
            working_dir: config.working_dir.clone(),
            pid_dir: config.pid_dir.clone(),
            ports: config.ports(),
            patterns: config.sweep_regexes()?,
            poll_interval: config.poll_interval,
            teardown: config.teardown,
            teardown_passes: 0,
        })
    }

    /// Launch `spec` and wait for its readiness marker.
    ///
    /// The process is tracked as soon as it is spawned, before the first
    /// await, so dropping this future (on interrupt) still leaves it for
    /// [`teardown_all`](Self::teardown_all). On a readiness failure it stays
    /// tracked as well.
    ///
    /// # Panics
    /// If `spec.role` is already tracked. Starting a role twice is a
    /// sequencing bug in the caller.
    pub async fn start(&mut self, spec: &DependencySpec) -> Result<StartedDependency, StartError> {
        let role = spec.role;

        let slot = match self.tracked.entry(role) {
            Entry::Occupied(_) => panic!("{role} is already tracked; refusing to start it twice"),
            Entry::Vacant(slot) => slot,
        };

        let mut child = build_command(&spec.launch, &self.working_dir)
            .spawn()
            .map_err(|source| StartError::Launch { role, source })?;
        let pid = child.id();
        let output = ChildOutput::from_child(&mut child);

        info!(role = %role, pid = ?pid, command = %spec.launch.display(), "Dependency launched");

        if let Some(pid) = pid {
            let data = PidFileData {
                pid,
                port: spec.port,
                command: spec.launch.display(),
            };
            if let Err(e) = write_pidfile(&self.pid_dir, role, &data) {
                debug!(role = %role, error = %e, "Failed to write PID file");
            }
        }

        let tracked = slot.insert(TrackedProcess {
            pid,
            launch: spec.launch.clone(),
            child,
            output: Some(output),
            forwarder: None,
            exit_status: None,
        });

        let watch = ReadinessWatch {
            label: role.name(),
            marker: &spec.marker,
            timeout: spec.startup_timeout,
            poll_interval: self.poll_interval,
        };

        let outcome = match tracked.output.as_mut() {
            Some(output) => wait_for_ready(&mut tracked.child, output, &watch).await,
            None => ReadinessOutcome::TimedOut,
        };

        match outcome {
            ReadinessOutcome::Ready => {
                if let Some(output) = tracked.output.take() {
                    tracked.forwarder = Some(spawn_forwarder(output, role.name()));
                }
                info!(role = %role, pid = ?pid, "Dependency ready");
                Ok(StartedDependency {
                    role,
                    pid,
                    port: spec.port,
                })
            }
            ReadinessOutcome::ProcessExited(status) => {
                tracked.exit_status = Some(status);
                warn!(role = %role, %status, "Dependency exited before becoming ready");
                Err(StartError::NotReady { role, outcome })
            }
            ReadinessOutcome::TimedOut => {
                warn!(
                    role = %role,
                    timeout = ?spec.startup_timeout,
                    "Dependency readiness timed out"
                );
                Err(StartError::NotReady { role, outcome })
            }
        }
    }

    pub fn is_tracked(&self, role: DependencyRole) -> bool {
        self.tracked.contains_key(&role)
    }

    /// Roles currently tracked, in start order.
    pub fn tracked_roles(&self) -> Vec<DependencyRole> {
        self.tracked.keys().copied().collect()
    }

    /// How many times [`teardown_all`](Self::teardown_all) has run.
    pub const fn teardown_passes(&self) -> u32 {
        self.teardown_passes
    }

    /// Stop every tracked process, then reclaim the managed ports.
    ///
    /// # Strategy
    /// 1. For each tracked process: SIGTERM, bounded wait, SIGKILL, bounded wait
    /// 2. Forget processes confirmed gone and delete their PID files
    /// 3. Keep survivors tracked (their PID files let the sweep find them)
    /// 4. Always run a reclamation pass over the ports and patterns
    ///
    /// Safe to call any number of times; nothing here fails the caller.
    pub async fn teardown_all(&mut self) -> TeardownSummary {
        self.teardown_passes += 1;
        let mut summary = TeardownSummary::default();

        let tracked = std::mem::take(&mut self.tracked);
        for (role, mut process) in tracked {
            debug!(
                role = %role,
                pid = ?process.pid,
                command = %process.launch.display(),
                "Stopping dependency"
            );

            let status = match process.exit_status {
                Some(status) => Some(status),
                None => match shutdown_child(&mut process.child, &self.teardown).await {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(role = %role, error = %e, "Failed to stop dependency");
                        None
                    }
                },
            };

            match status {
                Some(status) => {
                    info!(role = %role, %status, "Dependency stopped");
                    if let Some(forwarder) = process.forwarder.take() {
                        forwarder.abort();
                    }
                    if let Err(e) = delete_pidfile(&self.pid_dir, role) {
                        debug!(role = %role, error = %e, "Failed to delete PID file");
                    }
                    summary.stopped.push((role, status));
                }
                None => {
                    warn!(
                        role = %role,
                        pid = ?process.pid,
                        "Dependency survived SIGKILL, leaving it to the sweep"
                    );
                    summary.lingering.push(role);
                    self.tracked.insert(role, process);
                }
            }
        }

        summary.reclaim = self.reclaimer.reclaim(&self.ports, &self.patterns).await;
        self.forget_reaped();

        summary
    }

    /// Drop survivors that the reclamation pass finished off.
    fn forget_reaped(&mut self) {
        let pid_dir = &self.pid_dir;
        self.tracked.retain(|role, process| match process.child.try_wait() {
            Ok(Some(status)) => {
                debug!(role = %role, %status, "Lingering dependency reaped after reclamation");
                if let Some(forwarder) = process.forwarder.take() {
                    forwarder.abort();
                }
                if let Err(e) = delete_pidfile(pid_dir, *role) {
                    debug!(role = %role, error = %e, "Failed to delete PID file");
                }
                false
            }
            _ => true,
        });
    }
}

fn build_command(launch: &LaunchSpec, working_dir: &Path) -> Command {
    let mut cmd = Command::new(&launch.program);
    cmd.args(&launch.args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so teardown reaches everything a wrapper spawned
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}
