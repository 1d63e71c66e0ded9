//! PID file management for tracking dependency processes.
//!
//! The supervisor records each launched dependency so a later run can find
//! and kill it if this one crashed before teardown.
//!
//! # Safety guarantees
//! - Atomic writes via temp file + rename
//! - Process verification before killing (prevents PID reuse issues)
//! - Conservative cleanup (if verification fails, only delete the PID file)

mod io;
mod verify;

pub use io::{PidFileData, delete_pidfile, list_pidfiles, read_pidfile, write_pidfile};
pub(crate) use verify::join_command;
pub use verify::{command_line, is_our_process, pid_exists};
