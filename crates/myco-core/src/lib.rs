//! Core domain types for the myco harness.
//!
//! Roles, run states, readiness outcomes, configuration and the error
//! taxonomy. This crate has no process or socket code; see `myco-runtime`.

#![deny(unused_crate_dependencies)]

pub mod config;
pub mod domain;
pub mod error;

// Re-export commonly used types for convenience
pub use config::{
    BUILD_TOOL_PATTERN, DEFAULT_DECLARATION_FILE, DEFAULT_SERVER1_PORT, DEFAULT_SERVER2_PORT,
    DependencySpec, FORCEFUL_BUILD_TOOL_PATTERN, HarnessConfig, LaunchSpec, ReclaimConfig,
    SERVICE_BINARY_PATTERN, TaskRunnerSpec, TeardownConfig,
};
pub use domain::{DependencyRole, PortBinding, ReadinessOutcome, RunReport, RunState, Verdict};
pub use error::{ConfigError, HarnessError, StartError};
