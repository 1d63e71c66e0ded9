//! Error taxonomy for a harness run.
//!
//! Only the controller turns these into an exit status. Failures inside port
//! reclamation never show up here; they are logged and swallowed where they
//! happen.

use std::io;

use thiserror::Error;

use crate::domain::{DependencyRole, ReadinessOutcome};

/// A dependency could not be brought to the ready state.
#[derive(Debug, Error)]
pub enum StartError {
    /// The launch command itself could not be spawned.
    #[error("{role} failed to launch: {source}")]
    Launch {
        role: DependencyRole,
        #[source]
        source: io::Error,
    },

    /// The process was launched but never printed its marker.
    ///
    /// The process stays tracked by the supervisor so teardown still reaps it.
    #[error("{role} did not become ready: {outcome}")]
    NotReady {
        role: DependencyRole,
        outcome: ReadinessOutcome,
    },
}

impl StartError {
    pub const fn role(&self) -> DependencyRole {
        match self {
            Self::Launch { role, .. } | Self::NotReady { role, .. } => *role,
        }
    }

    /// The readiness outcome that caused the failure, if the process launched.
    pub const fn outcome(&self) -> Option<ReadinessOutcome> {
        match self {
            Self::Launch { .. } => None,
            Self::NotReady { outcome, .. } => Some(*outcome),
        }
    }
}

/// Invalid harness configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Port {0} is assigned to more than one dependency")]
    DuplicatePort(u16),

    #[error("Port {0} is a privileged port. Please use a port >= 1024.")]
    PrivilegedPort(u16),

    #[error("Readiness marker for {0} is empty")]
    EmptyMarker(DependencyRole),

    #[error("Startup timeout for {0} must be greater than zero")]
    ZeroTimeout(DependencyRole),

    #[error("Invalid sweep pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Launch command for {0} has an empty program")]
    EmptyProgram(String),
}

/// Everything that can end a run with a failure.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Missing declaration file, missing task runner, or invalid settings.
    /// Reported before any child is started.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Ports still held after the escalated reclamation pass.
    #[error("Ports {ports:?} are still in use after cleanup")]
    PortConflict { ports: Vec<u16> },

    /// A dependency failed to start or become ready.
    #[error(transparent)]
    Startup(#[from] StartError),

    /// The client ran but did not succeed.
    #[error("Client failed: {0}")]
    ClientFailure(String),

    /// An interrupt or termination signal was received.
    #[error("Interrupted by signal")]
    Interrupted,
}

impl From<ConfigError> for HarnessError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_error_exposes_role_and_outcome() {
        let err = StartError::NotReady {
            role: DependencyRole::Server2,
            outcome: ReadinessOutcome::TimedOut,
        };
        assert_eq!(err.role(), DependencyRole::Server2);
        assert_eq!(err.outcome(), Some(ReadinessOutcome::TimedOut));
        assert_eq!(
            err.to_string(),
            "Server2 did not become ready: timed out waiting for readiness marker"
        );

        let err = StartError::Launch {
            role: DependencyRole::Server1,
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(err.outcome(), None);
        assert!(err.to_string().starts_with("Server1 failed to launch"));
    }

    #[test]
    fn config_errors_become_configuration_failures() {
        let err: HarnessError = ConfigError::DuplicatePort(3002).into();
        assert!(matches!(err, HarnessError::Configuration(ref msg) if msg.contains("3002")));
    }
}
