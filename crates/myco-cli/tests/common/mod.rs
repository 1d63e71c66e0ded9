//! Shared setup for end-to-end harness runs against `myco-stub-service`.

#![allow(dead_code)]

use std::net::TcpListener;
use std::time::Duration;

use myco_core::{HarnessConfig, LaunchSpec, ReclaimConfig, TeardownConfig};
use tempfile::TempDir;

pub const STUB: &str = env!("CARGO_BIN_EXE_myco-stub-service");

/// A scratch working directory plus a config pointing at the stub service.
pub struct TestHarness {
    pub dir: TempDir,
    pub config: HarnessConfig,
    /// Unique string on every stub's command line, also the sweep pattern.
    pub tag: String,
}

/// Ask the OS for a port nobody is using right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

pub fn stub_launch(port: u16, marker: &str, tag: &str, extra: &[&str]) -> LaunchSpec {
    let port = port.to_string();
    let mut args = vec!["--port", port.as_str(), "--marker", marker, "--tag", tag];
    args.extend_from_slice(extra);
    LaunchSpec::new(STUB, args)
}

impl TestHarness {
    /// Both dependencies healthy, client exits 0.
    pub fn new(name: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join("justfile"), "# test\n").expect("write justfile");

        let tag = format!("myco-e2e-{name}-{}", std::process::id());
        let mut config = HarnessConfig::with_defaults(dir.path());

        config.task_runner.program = "sh".to_string();
        config.task_runner.version_args =
            vec!["-c".to_string(), "echo 'sh (test runner)'".to_string()];

        let server1_port = free_port();
        let mut server2_port = free_port();
        while server2_port == server1_port {
            server2_port = free_port();
        }

        config.server2.port = server2_port;
        config.server2.launch = stub_launch(server2_port, &config.server2.marker, &tag, &[]);
        config.server2.startup_timeout = Duration::from_secs(10);

        config.server1.port = server1_port;
        config.server1.launch = stub_launch(server1_port, &config.server1.marker, &tag, &[]);
        config.server1.startup_timeout = Duration::from_secs(10);

        config.client = LaunchSpec::new("sh", ["-c", "echo \"client: $1 $2\"", "client"]);
        config.sweep_patterns = vec![regex::escape(&tag)];
        config.escalation_patterns = Vec::new();

        config.reclaim = ReclaimConfig {
            kill_pause: Duration::from_millis(10),
            settle_delay: Duration::from_millis(200),
            escalation_pause: Duration::from_millis(100),
        };
        config.teardown = TeardownConfig {
            graceful_timeout: Duration::from_secs(2),
            forceful_timeout: Duration::from_secs(2),
        };

        Self { dir, config, tag }
    }

    /// Replace a dependency's stub flags.
    pub fn with_stub_flags(mut self, role: myco_core::DependencyRole, extra: &[&str]) -> Self {
        let dep = self.config.dependency_mut(role);
        dep.launch = stub_launch(dep.port, &dep.marker, &self.tag, extra);
        self
    }

    pub fn with_client_script(mut self, script: &str) -> Self {
        self.config.client = LaunchSpec::new("sh", ["-c", script, "client"]);
        self
    }
}
