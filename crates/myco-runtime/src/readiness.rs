//! Readiness detection by watching a child's output for a marker line.
//!
//! A service declares itself ready by printing a marker once its listener is
//! bound and any internal setup (such as connecting to its own dependency)
//! is done. We never probe the port directly.

use std::time::Duration;

use myco_core::ReadinessOutcome;
use tokio::process::Child;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::output::{ChildOutput, decode_line};

/// How long one read attempt may block before we fall back to sleeping.
const READ_WINDOW: Duration = Duration::from_millis(20);

/// Parameters for one readiness wait.
#[derive(Debug, Clone)]
pub struct ReadinessWatch<'a> {
    /// Prefix for echoed lines, usually the role name.
    pub label: &'a str,
    /// Substring that marks readiness; matched anywhere in a line.
    pub marker: &'a str,
    pub timeout: Duration,
    /// Sleep between polls when no line was available.
    pub poll_interval: Duration,
}

/// Poll `child` until it prints `watch.marker`, exits, or `watch.timeout` elapses.
///
/// # Strategy
/// 1. If the process has exited, return `ProcessExited` (a dead process never becomes ready)
/// 2. Try a short bounded read of one line from stdout/stderr
/// 3. Echo the line, return `Ready` on a marker match
/// 4. With no line available, sleep `poll_interval` and poll again
///
/// Lines that are not valid UTF-8 are logged and skipped. Every wait is
/// bounded, so a caller racing this against a cancellation signal regains
/// control promptly.
pub async fn wait_for_ready(
    child: &mut Child,
    output: &mut ChildOutput,
    watch: &ReadinessWatch<'_>,
) -> ReadinessOutcome {
    let deadline = Instant::now() + watch.timeout;
    debug!(
        label = %watch.label,
        marker = %watch.marker,
        timeout = ?watch.timeout,
        "waiting for readiness marker"
    );

    loop {
        let now = Instant::now();
        if now >= deadline {
            return ReadinessOutcome::TimedOut;
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(label = %watch.label, %status, "process exited before becoming ready");
                return ReadinessOutcome::ProcessExited(status);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(label = %watch.label, error = %e, "failed to poll process status");
            }
        }

        let remaining = deadline - now;
        if let Some(bytes) = output.next_line(READ_WINDOW.min(remaining)).await {
            match decode_line(bytes) {
                Ok(line) => {
                    println!("   {}: {}", watch.label, line.trim_end());
                    if line.contains(watch.marker) {
                        return ReadinessOutcome::Ready;
                    }
                    // More output may already be buffered; read again without sleeping
                    continue;
                }
                Err(e) => {
                    warn!(label = %watch.label, error = %e, "error decoding output line");
                }
            }
        }

        sleep(watch.poll_interval.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}
