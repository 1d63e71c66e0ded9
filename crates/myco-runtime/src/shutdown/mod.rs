//! Process termination for tracked and untracked processes.
//!
//! Provides two strategies:
//! - `shutdown_child`: For tracked processes with a `Child` handle
//!   (SIGTERM → SIGKILL, with reaping)
//! - `force_kill`: For processes found by reclamation probes (SIGKILL by PID, no reaping)

mod child;
mod pid;

pub use child::shutdown_child;
pub use pid::{force_kill, is_protected_pid};
