// Per-component configuration, validated once at the boundary

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::application::constants::DEFAULT_SCRATCH_ROOT;
use crate::domain::TaskId;
use crate::error::{AppError, Result};

/// Options for expanding one invocation into a task set
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Fan out over BIDS participants/sessions
    pub bids: bool,
    /// Parameter names to sweep, applied in order
    pub sweep: Vec<String>,
    /// Output location written into every record; defaults to the run directory
    pub output_location: Option<String>,
}

impl BuildOptions {
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for param in &self.sweep {
            if param.trim().is_empty() {
                return Err(AppError::Usage("sweep parameter name is empty".into()));
            }
            if !seen.insert(param.as_str()) {
                return Err(AppError::Usage(format!(
                    "sweep parameter '{param}' given more than once"
                )));
            }
        }
        Ok(())
    }
}

/// How one task instance is executed
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Local execution: no data staging, no output upload, no scratch purge
    pub local: bool,
    /// Directory the tool runs in when data is not staged
    pub workdir: Option<PathBuf>,
    /// Volume mounts handed to the executor (`host:container`)
    pub volumes: Vec<String>,
    /// Run the tool's container as the calling user
    pub propagate_user: bool,
    /// Root for per-task scratch directories and lock files
    pub scratch_root: PathBuf,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            local: true,
            workdir: None,
            volumes: Vec::new(),
            propagate_user: false,
            scratch_root: PathBuf::from(DEFAULT_SCRATCH_ROOT),
        }
    }
}

impl ExecutionContext {
    pub fn validate(&self) -> Result<()> {
        if self.scratch_root.as_os_str().is_empty() {
            return Err(AppError::Config("scratch root is empty".into()));
        }
        for volume in &self.volumes {
            if !volume.contains(':') {
                return Err(AppError::Usage(format!(
                    "volume '{volume}' must be of the form host:container"
                )));
            }
        }
        Ok(())
    }
}

/// Which Task Records of a prior run to execute again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerunMode {
    All,
    Failed,
    Incomplete,
    Select(Vec<TaskId>),
}

impl RerunMode {
    /// Build a mode from its name and the explicit id list, rejecting
    /// `select` without ids before anything touches the filesystem.
    pub fn from_parts(mode: &str, ids: &[TaskId]) -> Result<Self> {
        let parsed = match mode {
            "all" => RerunMode::All,
            "failed" => RerunMode::Failed,
            "incomplete" => RerunMode::Incomplete,
            "select" => RerunMode::Select(ids.to_vec()),
            other => {
                return Err(AppError::Usage(format!(
                    "unknown rerun mode '{other}' (expected all, failed, incomplete or select)"
                )))
            }
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if let RerunMode::Select(ids) = self {
            if ids.is_empty() {
                return Err(AppError::Usage(
                    "rerun mode 'select' requires at least one task id".into(),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for RerunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RerunMode::All => write!(f, "all"),
            RerunMode::Failed => write!(f, "failed"),
            RerunMode::Incomplete => write!(f, "incomplete"),
            RerunMode::Select(ids) => write!(f, "select{ids:?}"),
        }
    }
}
