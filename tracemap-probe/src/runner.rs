use crate::error::{ProbeError, Result};
use crate::hop::{HopRecord, parse_output};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const DEFAULT_PROBE_PROGRAM: &str = "traceroute";
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 180;
/// Seconds the utility waits for each probe reply (`-w`).
pub const PER_HOP_WAIT_SECS: u64 = 3;

/// One protocol variant to trace a target with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTask {
    /// Label stored on edges first discovered by this variant
    pub protocol: String,
    pub args: Vec<String>,
}

impl ProbeTask {
    pub fn udp(queries: u32) -> Self {
        Self {
            protocol: "UDP (Default)".to_string(),
            args: vec!["-q".to_string(), queries.to_string()],
        }
    }

    pub fn icmp(queries: u32) -> Self {
        Self {
            protocol: "ICMP (Echo)".to_string(),
            args: vec!["-I".to_string(), "-q".to_string(), queries.to_string()],
        }
    }

    pub fn tcp(port: u16, queries: u32) -> Self {
        Self {
            protocol: format!("TCP:{}", port),
            args: vec![
                "-T".to_string(),
                "-p".to_string(),
                port.to_string(),
                "-q".to_string(),
                queries.to_string(),
            ],
        }
    }
}

/// Build the variants issued for every target: UDP always, then ICMP and one
/// TCP variant per port when requested. A zero query count is raised to 1.
pub fn build_probe_tasks(queries: u32, icmp: bool, tcp_ports: &[u16]) -> Vec<ProbeTask> {
    let queries = queries.max(1);
    let mut tasks = vec![ProbeTask::udp(queries)];
    if icmp {
        tasks.push(ProbeTask::icmp(queries));
    }
    for port in tcp_ports {
        tasks.push(ProbeTask::tcp(*port, queries));
    }
    tasks
}

/// Runs the external traceroute utility and parses what it prints.
#[derive(Debug, Clone)]
pub struct ProbeRunner {
    program: String,
    timeout_secs: u64,
}

impl ProbeRunner {
    pub fn new() -> Self {
        Self {
            program: DEFAULT_PROBE_PROGRAM.to_string(),
            timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Trace `target` with one protocol variant.
    ///
    /// Never fails: a missing utility, non-zero exit or timeout is logged and
    /// turns into an empty hop list.
    pub async fn run_task(&self, target: &str, task: &ProbeTask) -> (String, Vec<HopRecord>) {
        info!("Probing {} with {}", target, task.protocol);

        let hops = match self.invoke(target, task).await {
            Ok(output) => parse_output(&output, target),
            Err(e) => {
                warn!("Probe of {} ({}) failed: {}", target, task.protocol, e);
                Vec::new()
            }
        };

        debug!(
            "Probe of {} ({}) produced {} records",
            target,
            task.protocol,
            hops.len()
        );
        (task.protocol.clone(), hops)
    }

    async fn invoke(&self, target: &str, task: &ProbeTask) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .arg("-w")
            .arg(PER_HOP_WAIT_SECS.to_string())
            .args(&task.args)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), command.output())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout_secs))??;

        if !output.status.success() {
            debug!(
                "{} stderr: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(ProbeError::ExitStatus(output.status.to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for ProbeRunner {
    fn default() -> Self {
        Self::new()
    }
}
