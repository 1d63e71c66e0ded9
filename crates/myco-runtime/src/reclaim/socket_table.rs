//! Socket-table probes: who is listening on a port.
//!
//! Two independent tools are asked. Either may be missing or refuse to
//! report other users' sockets; the reclaimer treats that as "nothing found".

use std::collections::BTreeSet;
use std::io;
use std::net::TcpListener;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{KillTarget, ReclaimProbe, ReclaimRequest};

/// Upper bound on any single external tool invocation.
const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a discovery tool, capturing its output.
///
/// A non-zero exit is not an error here: `lsof` exits 1 when nothing matches.
/// Only "could not run at all" and "did not finish in time" are.
pub(crate) async fn run_tool(program: &str, args: &[&str]) -> io::Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);

    match timeout(TOOL_TIMEOUT, cmd.output()).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{program} did not finish within {TOOL_TIMEOUT:?}"),
        )),
    }
}

/// Check if a port is available by attempting to bind to it.
pub fn is_port_bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok_and(|listener| listener.local_addr().is_ok())
}

/// `lsof -ti :<port>`: one pid per line.
#[derive(Debug, Clone)]
pub struct LsofProbe {
    program: String,
}

impl Default for LsofProbe {
    fn default() -> Self {
        Self::with_program("lsof")
    }
}

impl LsofProbe {
    /// Use a different executable (tests point this at something missing).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// PIDs holding `port`, or `Err` if the tool could not be run.
    pub async fn owners(&self, port: u16) -> io::Result<Vec<u32>> {
        let target = format!(":{port}");
        let output = run_tool(&self.program, &["-ti", &target]).await?;
        Ok(parse_lsof_pids(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl ReclaimProbe for LsofProbe {
    fn name(&self) -> &'static str {
        "lsof"
    }

    async fn discover(&self, request: &ReclaimRequest) -> io::Result<Vec<KillTarget>> {
        let mut targets = Vec::new();
        for &port in &request.ports {
            for pid in self.owners(port).await? {
                debug!(port = %port, pid = %pid, "lsof reports listener");
                targets.push(KillTarget::new(pid, format!("holds port {port} (lsof)")));
            }
        }
        Ok(targets)
    }
}

/// `netstat -tulpn`: listening sockets with a `<pid>/<program>` column.
#[derive(Debug, Clone)]
pub struct NetstatProbe {
    program: String,
}

impl Default for NetstatProbe {
    fn default() -> Self {
        Self::with_program("netstat")
    }
}

impl NetstatProbe {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ReclaimProbe for NetstatProbe {
    fn name(&self) -> &'static str {
        "netstat"
    }

    async fn discover(&self, request: &ReclaimRequest) -> io::Result<Vec<KillTarget>> {
        let output = run_tool(&self.program, &["-tulpn"]).await?;
        let table = String::from_utf8_lossy(&output.stdout);

        let mut targets = Vec::new();
        for &port in &request.ports {
            for pid in parse_netstat_pids(&table, port) {
                debug!(port = %port, pid = %pid, "netstat reports listener");
                targets.push(KillTarget::new(pid, format!("holds port {port} (netstat)")));
            }
        }
        Ok(targets)
    }
}

fn parse_lsof_pids(stdout: &str) -> Vec<u32> {
    let pids: BTreeSet<u32> = stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.into_iter().collect()
}

/// Extract owning PIDs of LISTEN lines whose local address ends in `:<port>`.
///
/// A line looks like:
/// `tcp  0  0 0.0.0.0:3002  0.0.0.0:*  LISTEN  4242/rpc_server`
///
/// The `-` shown for sockets owned by other users yields nothing.
fn parse_netstat_pids(table: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{port}");
    let mut pids = BTreeSet::new();

    for line in table.lines() {
        if !line.contains("LISTEN") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        // Local address is the fourth column; matching the exact suffix keeps :30020 out of :3002
        let Some(local) = fields.get(3) else {
            continue;
        };
        if !local.ends_with(&suffix) {
            continue;
        }

        let pid = fields
            .iter()
            .rev()
            .find_map(|field| field.split_once('/'))
            .and_then(|(pid, _)| pid.parse::<u32>().ok());
        if let Some(pid) = pid {
            pids.insert(pid);
        }
    }

    pids.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETSTAT_SAMPLE: &str = "\
Active Internet connections (only servers)
Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program name
tcp        0      0 0.0.0.0:3002            0.0.0.0:*               LISTEN      4242/rpc_server
tcp        0      0 127.0.0.1:30020         0.0.0.0:*               LISTEN      5555/other
tcp6       0      0 :::3004                 :::*                    LISTEN      4343/rpc_server
tcp        0      0 10.0.0.2:3002           10.0.0.9:51234          ESTABLISHED 4242/rpc_server
tcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN      -
udp        0      0 0.0.0.0:3002            0.0.0.0:*                           6666/dns
";

    #[test]
    fn netstat_matches_exact_port_only() {
        assert_eq!(parse_netstat_pids(NETSTAT_SAMPLE, 3002), vec![4242]);
        assert_eq!(parse_netstat_pids(NETSTAT_SAMPLE, 3004), vec![4343]);
        assert!(parse_netstat_pids(NETSTAT_SAMPLE, 3000).is_empty());
    }

    #[test]
    fn netstat_skips_sockets_without_owner() {
        assert!(parse_netstat_pids(NETSTAT_SAMPLE, 22).is_empty());
    }

    #[test]
    fn lsof_output_is_deduplicated() {
        assert_eq!(parse_lsof_pids("123\n456\n123\n\nnoise\n"), vec![123, 456]);
        assert!(parse_lsof_pids("").is_empty());
    }

    #[tokio::test]
    async fn missing_tool_is_an_error_not_a_panic() {
        let probe = LsofProbe::with_program("definitely_not_a_real_command_12345");
        assert!(probe.owners(3002).await.is_err());

        let netstat = NetstatProbe::with_program("definitely_not_a_real_command_12345");
        let request = ReclaimRequest::new(vec![3002], Vec::new());
        assert!(netstat.discover(&request).await.is_err());
    }

    #[test]
    fn held_port_is_not_bindable() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_bindable(port));
        drop(listener);
        assert!(is_port_bindable(port));
    }
}
