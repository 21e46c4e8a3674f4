// Process tree probe
// reason: sysinfo for cross-platform process enumeration
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, System};
use tracing::debug;

use stratus_core::application::constants::BYTES_PER_MB;
use stratus_core::port::{ProbeError, ProcessStat, ProcessTreeProbe};

/// Process tree probe using sysinfo
///
/// Keeps one `System` across calls so CPU usage is measured between
/// consecutive refreshes.
pub struct SysinfoProcessProbe {
    system: Arc<Mutex<System>>,
}

impl SysinfoProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for SysinfoProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap existence check before a full process-table refresh
fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid as NixPid;

        match i32::try_from(pid) {
            // EPERM still means the process exists
            Ok(raw) => !matches!(kill(NixPid::from_raw(raw), None), Err(nix::errno::Errno::ESRCH)),
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[async_trait]
impl ProcessTreeProbe for SysinfoProcessProbe {
    async fn tree(&self, root: u32) -> Result<Vec<ProcessStat>, ProbeError> {
        if !is_alive(root) {
            return Err(ProbeError::Vanished(root));
        }

        let mut sys = self
            .system
            .lock()
            .map_err(|_| ProbeError::Unavailable("process table lock poisoned".into()))?;
        sys.refresh_processes();

        let processes = sys.processes();
        if !processes.contains_key(&Pid::from_u32(root)) {
            return Err(ProbeError::Vanished(root));
        }

        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in processes {
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*pid);
            }
        }

        let mut stats = Vec::new();
        let mut queue = VecDeque::from([Pid::from_u32(root)]);
        while let Some(pid) = queue.pop_front() {
            // A descendant may exit between enumeration and read
            let Some(process) = processes.get(&pid) else {
                return Err(ProbeError::Vanished(pid.as_u32()));
            };
            stats.push(ProcessStat {
                pid: pid.as_u32(),
                parent: process.parent().map(|p| p.as_u32()),
                name: process.name().to_string(),
                cmdline: process.cmd().to_vec(),
                cpu_percent: f64::from(process.cpu_usage()),
                ram_mb: process.memory() as f64 / BYTES_PER_MB,
            });
            if let Some(kids) = children.get(&pid) {
                queue.extend(kids.iter().copied());
            }
        }

        debug!(root, processes = stats.len(), "Process tree enumerated");
        Ok(stats)
    }
}
