//! Harness configuration and validation.
//!
//! Pure data: which commands to run, which ports and patterns to reclaim,
//! and how long each bounded wait may take. The CLI builds one of these with
//! [`HarnessConfig::with_defaults`] and applies its overrides on top.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;

use crate::domain::DependencyRole;
use crate::error::ConfigError;

/// Default port for Server1.
pub const DEFAULT_SERVER1_PORT: u16 = 3002;

/// Default port for Server2.
pub const DEFAULT_SERVER2_PORT: u16 = 3004;

/// Name of the task-runner declaration file that must exist in the working directory.
pub const DEFAULT_DECLARATION_FILE: &str = "justfile";

/// Process name of the service binary, matched against full command lines.
pub const SERVICE_BINARY_PATTERN: &str = "rpc_server";

/// Build-tool launched instance of the service binary.
pub const BUILD_TOOL_PATTERN: &str = "cargo run.*rpc_server";

/// Any build-tool invocation mentioning the service binary. Escalation only.
pub const FORCEFUL_BUILD_TOOL_PATTERN: &str = "cargo.*rpc_server";

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(
        program: impl Into<String>,
        args: I,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Shell-style rendering for log lines. Not meant to be re-parsed.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Copy of this spec with extra trailing arguments.
    #[must_use]
    pub fn with_args<S: ToString, I: IntoIterator<Item = S>>(&self, extra: I) -> Self {
        let mut spec = self.clone();
        spec.args.extend(extra.into_iter().map(|s| s.to_string()));
        spec
    }
}

/// How one dependency is launched and recognised as ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub role: DependencyRole,
    pub launch: LaunchSpec,
    /// Substring expected somewhere in one line of the combined output.
    pub marker: String,
    /// TCP port the dependency listens on.
    pub port: u16,
    pub startup_timeout: Duration,
}

/// The task runner whose presence is checked before anything starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunnerSpec {
    pub program: String,
    pub version_args: Vec<String>,
    /// Shown to the operator when the runner is missing.
    pub install_hint: String,
}

/// Pacing of reclamation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimConfig {
    /// Pause after each individual kill so the OS can release the handle.
    pub kill_pause: Duration,
    /// Sleep after a pass that killed something, before the caller re-checks.
    pub settle_delay: Duration,
    /// Pause between the forceful sweep and the follow-up pass when escalating.
    pub escalation_pause: Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            kill_pause: Duration::from_millis(100),
            settle_delay: Duration::from_secs(2),
            escalation_pause: Duration::from_secs(1),
        }
    }
}

/// Bounded waits used when stopping tracked processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownConfig {
    /// How long to wait after SIGTERM before escalating.
    pub graceful_timeout: Duration,
    /// How long to wait after SIGKILL before leaving the process to the sweep.
    pub forceful_timeout: Duration,
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout: Duration::from_secs(3),
            forceful_timeout: Duration::from_secs(2),
        }
    }
}

/// Complete configuration of one harness run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Directory the harness runs in; children inherit it.
    pub working_dir: PathBuf,
    /// File name (relative to `working_dir`) that must exist before starting.
    pub declaration_file: PathBuf,
    pub task_runner: TaskRunnerSpec,
    /// Dependency A.
    pub server2: DependencySpec,
    /// Dependency B.
    pub server1: DependencySpec,
    /// Client command; the two endpoints are appended at launch.
    pub client: LaunchSpec,
    pub endpoint_scheme: String,
    pub endpoint_host: String,
    /// Regular expressions matched against full process command lines.
    pub sweep_patterns: Vec<String>,
    /// Broader patterns added to the sweep when escalating.
    pub escalation_patterns: Vec<String>,
    /// Where per-role pidfiles are kept while dependencies run.
    pub pid_dir: PathBuf,
    /// Sleep between readiness polls when no output line is available.
    pub poll_interval: Duration,
    pub reclaim: ReclaimConfig,
    pub teardown: TeardownConfig,
}

impl HarnessConfig {
    /// Create config for the standard two-server layout rooted at `working_dir`.
    pub fn with_defaults(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let pid_dir = working_dir.join(".myco").join("pids");

        Self {
            declaration_file: PathBuf::from(DEFAULT_DECLARATION_FILE),
            task_runner: TaskRunnerSpec {
                program: "just".to_string(),
                version_args: vec!["--version".to_string()],
                install_hint: "brew install just (or: cargo install just)".to_string(),
            },
            server2: DependencySpec {
                role: DependencyRole::Server2,
                launch: LaunchSpec::new("just", ["server2"]),
                marker: "Server2 listening on".to_string(),
                port: DEFAULT_SERVER2_PORT,
                startup_timeout: Duration::from_secs(30),
            },
            server1: DependencySpec {
                role: DependencyRole::Server1,
                launch: LaunchSpec::new("just", ["server1"]),
                marker: "Server1 listening on".to_string(),
                port: DEFAULT_SERVER1_PORT,
                // Server1 also has to connect to Server2 before it is ready
                startup_timeout: Duration::from_secs(60),
            },
            client: LaunchSpec::new("just", ["client"]),
            endpoint_scheme: "https".to_string(),
            endpoint_host: "localhost".to_string(),
            sweep_patterns: vec![
                SERVICE_BINARY_PATTERN.to_string(),
                BUILD_TOOL_PATTERN.to_string(),
            ],
            escalation_patterns: vec![FORCEFUL_BUILD_TOOL_PATTERN.to_string()],
            pid_dir,
            poll_interval: Duration::from_millis(100),
            reclaim: ReclaimConfig::default(),
            teardown: TeardownConfig::default(),
            working_dir,
        }
    }

    /// Dependency settings for the given role.
    pub const fn dependency(&self, role: DependencyRole) -> &DependencySpec {
        match role {
            DependencyRole::Server2 => &self.server2,
            DependencyRole::Server1 => &self.server1,
        }
    }

    pub const fn dependency_mut(&mut self, role: DependencyRole) -> &mut DependencySpec {
        match role {
            DependencyRole::Server2 => &mut self.server2,
            DependencyRole::Server1 => &mut self.server1,
        }
    }

    /// Every port under management.
    pub fn ports(&self) -> Vec<u16> {
        vec![self.server1.port, self.server2.port]
    }

    /// Absolute path of the declaration file.
    pub fn declaration_path(&self) -> PathBuf {
        resolve(&self.working_dir, &self.declaration_file)
    }

    /// Endpoint addresses handed to the client: Server1 first, then Server2.
    pub fn client_endpoints(&self) -> [String; 2] {
        [self.server1.port, self.server2.port]
            .map(|port| format!("{}://{}:{}", self.endpoint_scheme, self.endpoint_host, port))
    }

    /// The client command with both endpoints appended.
    pub fn client_launch(&self) -> LaunchSpec {
        self.client.with_args(self.client_endpoints())
    }

    /// Compile the sweep patterns.
    pub fn sweep_regexes(&self) -> Result<Vec<Regex>, ConfigError> {
        compile(&self.sweep_patterns)
    }

    /// Sweep patterns plus the escalation-only ones.
    pub fn escalation_regexes(&self) -> Result<Vec<Regex>, ConfigError> {
        let mut regexes = self.sweep_regexes()?;
        regexes.extend(compile(&self.escalation_patterns)?);
        Ok(regexes)
    }

    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for role in DependencyRole::START_ORDER {
            let dep = self.dependency(role);
            if dep.port < 1024 {
                return Err(ConfigError::PrivilegedPort(dep.port));
            }
            if !seen.insert(dep.port) {
                return Err(ConfigError::DuplicatePort(dep.port));
            }
            if dep.marker.trim().is_empty() {
                return Err(ConfigError::EmptyMarker(role));
            }
            if dep.startup_timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(role));
            }
            if dep.launch.program.trim().is_empty() {
                return Err(ConfigError::EmptyProgram(role.to_string()));
            }
        }

        if self.client.program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram("client".to_string()));
        }

        self.escalation_regexes().map(|_| ())
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::with_defaults("/work");
        assert!(config.validate().is_ok());
        assert_eq!(config.ports(), vec![3002, 3004]);
        assert_eq!(config.declaration_path(), PathBuf::from("/work/justfile"));
        assert_eq!(config.pid_dir, PathBuf::from("/work/.myco/pids"));
        assert!(config.server2.startup_timeout < config.server1.startup_timeout);
    }

    #[test]
    fn test_client_launch_appends_endpoints() {
        let config = HarnessConfig::with_defaults("/work");
        let launch = config.client_launch();
        assert_eq!(launch.program, "just");
        assert_eq!(
            launch.args,
            vec!["client", "https://localhost:3002", "https://localhost:3004"]
        );
        // The stored client spec is untouched
        assert_eq!(config.client.args, vec!["client"]);
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let mut config = HarnessConfig::with_defaults("/work");
        config.server1.port = config.server2.port;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePort(3004))
        ));
    }

    #[test]
    fn test_privileged_port_rejected() {
        let mut config = HarnessConfig::with_defaults("/work");
        config.server2.port = 80;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PrivilegedPort(80))
        ));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut config = HarnessConfig::with_defaults("/work");
        config.sweep_patterns.push("cargo run.*(".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_escalation_adds_broader_build_tool_pattern() {
        let config = HarnessConfig::with_defaults("/work");
        let sweep = config.sweep_regexes().unwrap();
        let escalation = config.escalation_regexes().unwrap();
        assert_eq!(escalation.len(), sweep.len() + 1);

        let cmdline = "cargo build --release --bin rpc_server";
        let build_tool = Regex::new(BUILD_TOOL_PATTERN).unwrap();
        let forceful = Regex::new(FORCEFUL_BUILD_TOOL_PATTERN).unwrap();
        assert!(!build_tool.is_match(cmdline));
        assert!(forceful.is_match(cmdline));
        assert!(escalation.iter().any(|re| re.as_str() == FORCEFUL_BUILD_TOOL_PATTERN));

        let mut config = config;
        config.escalation_patterns.push("(".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_empty_marker_and_zero_timeout_rejected() {
        let mut config = HarnessConfig::with_defaults("/work");
        config.server1.marker = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyMarker(DependencyRole::Server1))
        ));

        let mut config = HarnessConfig::with_defaults("/work");
        config.server2.startup_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroTimeout(DependencyRole::Server2))
        ));
    }

    #[test]
    fn test_absolute_declaration_file_kept() {
        let mut config = HarnessConfig::with_defaults("/work");
        config.declaration_file = PathBuf::from("/elsewhere/justfile");
        assert_eq!(
            config.declaration_path(),
            PathBuf::from("/elsewhere/justfile")
        );
    }
}
