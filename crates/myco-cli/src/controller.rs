//! The run state machine.
//!
//! ```text
//! PreflightCleanup → StartingDependencyA → StartingDependencyB → RunningClient
//!        │                    │                     │                  │
//!        │                    └──────────┬──────────┴──────────────────┘
//!        ▼                               ▼
//!   Done(failure)                   TearingDown → Done(success | failure)
//! ```
//!
//! A cancellation (SIGINT/SIGTERM) at any point forces `TearingDown` and a
//! failed run, including one that arrives while teardown is already under
//! way. Teardown runs at most once and also stops the client's process group.

use std::sync::Arc;

use chrono::Utc;
use myco_core::{DependencyRole, HarnessConfig, HarnessError, RunReport, RunState, Verdict};
use myco_runtime::{PortReclaimer, ProcessSupervisor, shutdown_child};
use regex::Regex;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bootstrap::verify_preconditions;
use crate::client::{spawn_client, wait_client};

/// Drives one harness run from pre-flight to teardown.
pub struct RunController {
    config: HarnessConfig,
    patterns: Vec<Regex>,
    escalation_patterns: Vec<Regex>,
    reclaimer: Arc<PortReclaimer>,
    supervisor: ProcessSupervisor,
    /// Kept here rather than in the client future so teardown can reach it.
    client: Option<Child>,
    state: RunState,
    torn_down: bool,
}

impl RunController {
    /// Controller with the standard reclamation probes.
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        let reclaimer = Arc::new(PortReclaimer::new(config.reclaim, config.pid_dir.clone()));
        Self::with_reclaimer(config, reclaimer)
    }

    /// Controller sharing an existing reclaimer with its supervisor.
    pub fn with_reclaimer(
        config: HarnessConfig,
        reclaimer: Arc<PortReclaimer>,
    ) -> Result<Self, HarnessError> {
        config.validate()?;
        let patterns = config.sweep_regexes()?;
        let escalation_patterns = config.escalation_regexes()?;
        let supervisor = ProcessSupervisor::new(&config, Arc::clone(&reclaimer))?;

        Ok(Self {
            config,
            patterns,
            escalation_patterns,
            reclaimer,
            supervisor,
            client: None,
            state: RunState::PreflightCleanup,
            torn_down: false,
        })
    }

    /// Run to completion or until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) -> RunReport {
        let started_at = Utc::now();

        let outcome = tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(HarnessError::Interrupted),
            result = self.drive() => result,
        };

        // Nothing has been launched if we failed before leaving pre-flight
        let launched_anything = !matches!(self.state, RunState::PreflightCleanup);
        let interrupted = matches!(outcome, Err(HarnessError::Interrupted));

        if let Err(e) = &outcome {
            println!("❌ {e}");
        }

        if launched_anything || interrupted {
            self.teardown().await;
        }

        // A signal during the final teardown still fails the run
        let outcome = match outcome {
            Ok(()) if shutdown.is_cancelled() => {
                println!("❌ {}", HarnessError::Interrupted);
                Err(HarnessError::Interrupted)
            }
            other => other,
        };

        let verdict = if outcome.is_ok() {
            Verdict::Success
        } else {
            Verdict::Failure
        };
        self.transition(RunState::Done(verdict));

        match verdict {
            Verdict::Success => println!("✅ Run completed successfully"),
            Verdict::Failure => println!("❌ Run failed"),
        }

        RunReport {
            state: self.state,
            failure: outcome.err().map(|e| e.to_string()),
            teardown_passes: self.supervisor.teardown_passes(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn drive(&mut self) -> Result<(), HarnessError> {
        self.transition(RunState::PreflightCleanup);
        let version = verify_preconditions(&self.config)?;
        println!("✅ Found {version}");
        self.preflight().await?;

        for role in DependencyRole::START_ORDER {
            self.transition(RunState::starting(role));
            self.start_dependency(role).await?;
        }

        self.transition(RunState::RunningClient);
        let [first, second] = self.config.client_endpoints();
        println!("🚀 Running client against {first} and {second}...");
        let child = spawn_client(&self.config.client_launch(), &self.config.working_dir)?;
        wait_client(self.client.insert(child)).await?;
        println!("✅ Client finished");
        Ok(())
    }

    /// Free the managed ports, escalating once if the first pass is not enough.
    async fn preflight(&self) -> Result<(), HarnessError> {
        let ports = self.config.ports();
        println!("🧹 Cleaning up ports {ports:?}...");

        self.reclaimer.reclaim(&ports, &self.patterns).await;
        if self.reclaimer.ports_are_free(&ports).await {
            println!("✅ Ports are free");
            return Ok(());
        }

        println!("⚠️  Ports still in use, forcing cleanup...");
        self.reclaimer.escalate(&ports, &self.escalation_patterns).await;

        let mut busy = Vec::new();
        for &port in &ports {
            if !self.reclaimer.ports_are_free(&[port]).await {
                busy.push(port);
            }
        }

        if busy.is_empty() {
            println!("✅ Ports are free");
            Ok(())
        } else {
            for binding in self.reclaimer.port_bindings(&busy).await {
                warn!(
                    port = %binding.port,
                    pid = ?binding.pid,
                    "Port still held after escalation"
                );
            }
            Err(HarnessError::PortConflict { ports: busy })
        }
    }

    async fn start_dependency(&mut self, role: DependencyRole) -> Result<(), HarnessError> {
        let spec = self.config.dependency(role).clone();
        println!("🚀 Starting {role} ({})...", spec.launch.display());

        let started = self.supervisor.start(&spec).await?;
        match started.pid {
            Some(pid) => println!("✅ {role} is ready on port {} (PID {pid})", started.port),
            None => println!("✅ {role} is ready on port {}", started.port),
        }
        Ok(())
    }

    /// Stop everything. Runs at most once per controller.
    async fn teardown(&mut self) {
        if self.torn_down {
            debug!("Teardown already ran, skipping");
            return;
        }
        self.torn_down = true;
        self.transition(RunState::TearingDown);

        println!("🧹 Stopping services...");
        if let Some(mut child) = self.client.take() {
            match shutdown_child(&mut child, &self.config.teardown).await {
                Ok(Some(status)) => debug!(%status, "Client stopped"),
                Ok(None) => warn!(pid = ?child.id(), "Client did not exit; left to the port sweep"),
                Err(e) => warn!(error = %e, "Failed to stop client"),
            }
        }

        let summary = self.supervisor.teardown_all().await;

        for (role, status) in &summary.stopped {
            debug!(role = %role, %status, "Stopped");
        }
        for role in &summary.lingering {
            println!("⚠️  {role} did not exit; left to the port sweep");
        }
        if summary.reclaim.any_killed {
            info!(
                killed = summary.reclaim.killed.len(),
                "Teardown sweep killed leftover processes"
            );
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Run state changed");
            self.state = next;
        }
    }
}
