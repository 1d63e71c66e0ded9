//! Domain types shared by the runtime and the CLI.
//!
//! Nothing in here touches processes or sockets; these are plain values
//! describing roles, outcomes and the controller's state.

use std::fmt;
use std::process::ExitStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A long-running service the client needs before it can run.
///
/// Start order is fixed: `Server2` first (dependency A), then `Server1`
/// (dependency B), which connects to `Server2` during its own startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DependencyRole {
    Server2,
    Server1,
}

impl DependencyRole {
    /// Roles in the order they are started.
    pub const START_ORDER: [Self; 2] = [Self::Server2, Self::Server1];

    /// Display name, also used as the output prefix for the role's lines.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Server2 => "Server2",
            Self::Server1 => "Server1",
        }
    }

    /// File stem used for the role's pidfile.
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Server2 => "server2",
            Self::Server1 => "server1",
        }
    }

    /// Inverse of [`slug`](Self::slug).
    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::START_ORDER.into_iter().find(|role| role.slug() == slug)
    }
}

impl fmt::Display for DependencyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of waiting for a process to print its readiness marker.
///
/// Consumed once by the caller; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready,
    TimedOut,
    ProcessExited(ExitStatus),
}

impl fmt::Display for ReadinessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::TimedOut => f.write_str("timed out waiting for readiness marker"),
            Self::ProcessExited(status) => write!(f, "process exited early ({status})"),
        }
    }
}

/// A port and the process currently holding it, if one could be found.
///
/// Recomputed on every reclamation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortBinding {
    pub port: u16,
    pub pid: Option<u32>,
}

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
}

/// The controller's position in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "verdict")]
pub enum RunState {
    PreflightCleanup,
    StartingDependencyA,
    StartingDependencyB,
    RunningClient,
    TearingDown,
    Done(Verdict),
}

impl RunState {
    /// State entered while `role` is being started.
    pub const fn starting(role: DependencyRole) -> Self {
        match role {
            DependencyRole::Server2 => Self::StartingDependencyA,
            DependencyRole::Server1 => Self::StartingDependencyB,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreflightCleanup => f.write_str("preflight cleanup"),
            Self::StartingDependencyA => f.write_str("starting dependency A"),
            Self::StartingDependencyB => f.write_str("starting dependency B"),
            Self::RunningClient => f.write_str("running client"),
            Self::TearingDown => f.write_str("tearing down"),
            Self::Done(Verdict::Success) => f.write_str("done (success)"),
            Self::Done(Verdict::Failure) => f.write_str("done (failure)"),
        }
    }
}

/// Summary of one run, printable as JSON by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// State the controller finished in.
    pub state: RunState,
    /// Human-readable failure reason, if the run failed.
    pub failure: Option<String>,
    /// How many teardown passes ran. Always 1 once preflight has passed.
    pub teardown_passes: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub const fn succeeded(&self) -> bool {
        matches!(self.state, RunState::Done(Verdict::Success))
    }

    /// Process exit status for this run: 0 on success, 1 otherwise.
    pub const fn exit_code(&self) -> i32 {
        if self.succeeded() { 0 } else { 1 }
    }
}
