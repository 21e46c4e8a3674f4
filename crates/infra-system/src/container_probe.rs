// Container runtime probe
// Workload launched through a container client runs under the runtime's
// daemon, so the client's own counters are near zero. Ask the runtime.
use async_trait::async_trait;
use std::sync::LazyLock;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use stratus_core::application::constants::{BYTES_PER_MB, CONTAINER_RUNTIME};
use stratus_core::port::{ChildResourceProbe, ProbeError, ProbeUsage, ProcessStat};

/// `12.5MiB`, `1.2 GB`, `512B`
static QUANTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([0-9]*\.?[0-9]+)\s*([A-Za-z]*)\s*$").unwrap());

/// Reads container usage through the runtime CLI (`docker stats`)
pub struct ContainerStatsProbe {
    runtime: String,
}

impl ContainerStatsProbe {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    async fn runtime_output(&self, args: &[&str]) -> Result<String, ProbeError> {
        let output = Command::new(&self.runtime)
            .args(args)
            .output()
            .await
            .map_err(|e| ProbeError::Unavailable(format!("{}: {e}", self.runtime)))?;
        if !output.status.success() {
            return Err(ProbeError::Unavailable(format!(
                "{} {} failed: {}",
                self.runtime,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Running container whose command contains `marker`
    async fn find_container(&self, marker: &str) -> Result<Option<String>, ProbeError> {
        let ids = self.runtime_output(&["ps", "-q"]).await?;
        for id in ids.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let inspect = match self.runtime_output(&["inspect", id]).await {
                Ok(out) => out,
                // Container exited since `ps`
                Err(_) => continue,
            };
            if inspect_matches(&inspect, marker)? {
                return Ok(Some(id.to_string()));
            }
        }
        Ok(None)
    }
}

impl Default for ContainerStatsProbe {
    fn default() -> Self {
        Self::new(CONTAINER_RUNTIME)
    }
}

#[async_trait]
impl ChildResourceProbe for ContainerStatsProbe {
    fn name(&self) -> &str {
        "container-stats"
    }

    fn accepts(&self, process: &ProcessStat) -> bool {
        let program = process
            .cmdline
            .first()
            .and_then(|p| p.rsplit('/').next())
            .unwrap_or(process.name.as_str());
        (process.name == self.runtime || program == self.runtime)
            && process.cmdline.iter().any(|arg| arg == "run")
    }

    async fn usage(&self, process: &ProcessStat) -> Result<ProbeUsage, ProbeError> {
        let marker = process
            .cmdline
            .last()
            .ok_or_else(|| ProbeError::Parse(format!("empty command line for {}", process.pid)))?;

        let Some(id) = self.find_container(marker).await? else {
            return Err(ProbeError::Unavailable(format!(
                "no running container for client {}",
                process.pid
            )));
        };

        let line = self
            .runtime_output(&[
                "stats",
                &id,
                "--no-stream",
                "--format",
                "{{.MemUsage}} {{.CPUPerc}}",
            ])
            .await
            .map_err(|_| ProbeError::Vanished(process.pid))?;
        let usage = parse_stats_line(&line)?;
        debug!(pid = process.pid, container = %id, cpu = usage.cpu_percent, ram_mb = usage.ram_mb, "Container usage");
        Ok(usage)
    }
}

/// Whether `docker inspect` output describes a container running `marker`
fn inspect_matches(inspect: &str, marker: &str) -> Result<bool, ProbeError> {
    let doc: serde_json::Value =
        serde_json::from_str(inspect).map_err(|e| ProbeError::Parse(e.to_string()))?;
    let containers = doc.as_array().map(Vec::as_slice).unwrap_or_default();

    Ok(containers.iter().any(|c| {
        c.pointer("/Config/Cmd")
            .and_then(|cmd| cmd.as_array())
            .map(|cmd| {
                cmd.iter()
                    .filter_map(|a| a.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
                    .contains(marker)
            })
            .unwrap_or(false)
    }))
}

/// Parse `"<used> / <limit> <cpu>%"` into CPU percent and used MB
fn parse_stats_line(line: &str) -> Result<ProbeUsage, ProbeError> {
    let line = line.trim();
    let (mem, rest) = line
        .split_once('/')
        .ok_or_else(|| ProbeError::Parse(format!("unexpected stats line '{line}'")))?;
    let cpu = rest
        .split_whitespace()
        .last()
        .and_then(|c| c.strip_suffix('%'))
        .ok_or_else(|| ProbeError::Parse(format!("no CPU column in '{line}'")))?;

    Ok(ProbeUsage {
        cpu_percent: cpu
            .parse()
            .map_err(|_| ProbeError::Parse(format!("bad CPU value '{cpu}'")))?,
        ram_mb: quantity_to_mb(mem)?,
    })
}

/// Convert a runtime memory quantity to MB
pub fn quantity_to_mb(raw: &str) -> Result<f64, ProbeError> {
    let caps = QUANTITY
        .captures(raw)
        .ok_or_else(|| ProbeError::Parse(format!("bad quantity '{raw}'")))?;
    let value: f64 = caps[1]
        .parse()
        .map_err(|_| ProbeError::Parse(format!("bad quantity '{raw}'")))?;

    let bytes_per_unit = match &caps[2] {
        "" | "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => BYTES_PER_MB,
        "GiB" => BYTES_PER_MB * 1024.0,
        "TiB" => BYTES_PER_MB * 1024.0 * 1024.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        unit => return Err(ProbeError::Parse(format!("unknown unit '{unit}'"))),
    };
    Ok(value * bytes_per_unit / BYTES_PER_MB)
}
