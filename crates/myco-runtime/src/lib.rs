//! Process runtime for the myco harness.
//!
//! Everything that touches the OS lives here: spawning and supervising
//! dependency processes, watching their output for readiness, signalling
//! them down, and reclaiming ports from whatever is left behind.
//!
//! # Structure
//!
//! - `output` - Combined stdout/stderr line reading
//! - `readiness` - Marker-based readiness detection
//! - `shutdown` - SIGTERM → SIGKILL escalation and kill-by-PID
//! - `pidfile` - On-disk record of running dependencies
//! - `reclaim` - Port reclamation probes and the reclaimer
//! - `supervisor` - Tracked dependency lifecycle
//! - `system` - Task-runner presence checks

#![deny(unused_crate_dependencies)]

pub mod output;
pub mod pidfile;
pub mod readiness;
pub mod reclaim;
pub mod shutdown;
pub mod supervisor;
pub mod system;

pub use output::{ChildOutput, ReadEvent, decode_line, spawn_forwarder};
pub use readiness::{ReadinessWatch, wait_for_ready};
pub use reclaim::{
    KillTarget, LsofProbe, NetstatProbe, PatternProbe, PidfileProbe, PortReclaimer, ReclaimProbe,
    ReclaimReport, ReclaimRequest,
};
pub use shutdown::{force_kill, is_protected_pid, shutdown_child};
pub use supervisor::{ProcessSupervisor, StartedDependency, TeardownSummary};
pub use system::{get_command_version, task_runner_version};
