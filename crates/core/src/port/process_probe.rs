// Process Probe Ports
// Sampling CPU/RAM of a supervised process tree

use async_trait::async_trait;
use thiserror::Error;

/// Host-visible view of one process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStat {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub cmdline: Vec<String>,
    pub cpu_percent: f64,
    pub ram_mb: f64,
}

/// CPU/RAM attributed to one process by a probe
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeUsage {
    pub cpu_percent: f64,
    pub ram_mb: f64,
}

impl From<&ProcessStat> for ProbeUsage {
    fn from(stat: &ProcessStat) -> Self {
        Self {
            cpu_percent: stat.cpu_percent,
            ram_mb: stat.ram_mb,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProbeError {
    /// Process exited between enumeration and read
    #[error("Process {0} vanished")]
    Vanished(u32),

    #[error("Probe unavailable: {0}")]
    Unavailable(String),

    #[error("Unparseable probe output: {0}")]
    Parse(String),
}

/// Enumerates a process and all of its descendants
#[async_trait]
pub trait ProcessTreeProbe: Send + Sync {
    /// Root first, then descendants.
    ///
    /// # Errors
    /// - ProbeError::Vanished if the root no longer exists
    async fn tree(&self, root: u32) -> Result<Vec<ProcessStat>, ProbeError>;
}

/// Alternate source of usage for descendants whose own counters are not
/// meaningful (e.g. a container client whose workload runs in a daemon)
#[async_trait]
pub trait ChildResourceProbe: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this probe should account for `process`
    fn accepts(&self, process: &ProcessStat) -> bool;

    async fn usage(&self, process: &ProcessStat) -> Result<ProbeUsage, ProbeError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted tree snapshots; reports the root vanished once drained
    pub struct ScriptedTreeProbe {
        snapshots: Mutex<VecDeque<Result<Vec<ProcessStat>, ProbeError>>>,
    }

    impl ScriptedTreeProbe {
        pub fn new(snapshots: Vec<Result<Vec<ProcessStat>, ProbeError>>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots.into()),
            }
        }
    }

    #[async_trait]
    impl ProcessTreeProbe for ScriptedTreeProbe {
        async fn tree(&self, root: u32) -> Result<Vec<ProcessStat>, ProbeError> {
            self.snapshots
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProbeError::Vanished(root)))
        }
    }

    /// Accepts processes by name and reports a fixed usage
    pub struct StaticChildProbe {
        pub process_name: String,
        pub usage: ProbeUsage,
    }

    #[async_trait]
    impl ChildResourceProbe for StaticChildProbe {
        fn name(&self) -> &str {
            "static"
        }

        fn accepts(&self, process: &ProcessStat) -> bool {
            process.name == self.process_name
        }

        async fn usage(&self, _process: &ProcessStat) -> Result<ProbeUsage, ProbeError> {
            Ok(self.usage)
        }
    }

    pub fn stat(pid: u32, parent: Option<u32>, name: &str, cpu: f64, ram: f64) -> ProcessStat {
        ProcessStat {
            pid,
            parent,
            name: name.to_string(),
            cmdline: vec![name.to_string()],
            cpu_percent: cpu,
            ram_mb: ram,
        }
    }
}
