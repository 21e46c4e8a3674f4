// Tool Executor Port
// Abstraction over the descriptor/invocation execution contract

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What the engine asks the executor to launch
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub descriptor: PathBuf,
    pub invocation: PathBuf,
    /// `host:container` mounts
    pub volumes: Vec<String>,
    pub propagate_user: bool,
}

/// Concrete process the engine spawns and supervises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }
}

/// Execution errors
///
/// A tool that runs and exits nonzero is not an error; these cover the
/// cases where no attempt could be made at all.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Output evaluation failed: {0}")]
    Evaluation(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Tool Executor trait
///
/// Implementations:
/// - BoshExecutor: Boutiques `bosh exec launch` / `bosh evaluate`
/// - MockToolExecutor: runs a shell snippet (tests)
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Build the command that executes `request`
    ///
    /// # Errors
    /// - ExecutionError::MissingInput if the descriptor or invocation is absent
    fn launch_command(&self, request: &LaunchRequest) -> Result<LaunchCommand, ExecutionError>;

    /// Evaluate the descriptor's declared output files for an invocation
    ///
    /// Relative paths are interpreted against `working_dir`.
    async fn evaluate_outputs(
        &self,
        descriptor: &Path,
        invocation: &Path,
        working_dir: &Path,
    ) -> Result<BTreeMap<String, PathBuf>, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;

    /// Runs `sh -c <script>` with the descriptor as `$1` and the invocation
    /// as `$2`, and declares a fixed output mapping
    pub struct MockToolExecutor {
        script: String,
        outputs: BTreeMap<String, PathBuf>,
    }

    impl MockToolExecutor {
        pub fn new(script: impl Into<String>) -> Self {
            Self {
                script: script.into(),
                outputs: BTreeMap::new(),
            }
        }

        pub fn with_output(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
            self.outputs.insert(name.into(), path.into());
            self
        }
    }

    #[async_trait]
    impl ToolExecutor for MockToolExecutor {
        fn launch_command(
            &self,
            request: &LaunchRequest,
        ) -> Result<LaunchCommand, ExecutionError> {
            if !request.descriptor.exists() {
                return Err(ExecutionError::MissingInput(
                    request.descriptor.display().to_string(),
                ));
            }
            Ok(LaunchCommand::new(
                "sh",
                vec![
                    "-c".to_string(),
                    self.script.clone(),
                    "mock-tool".to_string(),
                    request.descriptor.display().to_string(),
                    request.invocation.display().to_string(),
                ],
            ))
        }

        async fn evaluate_outputs(
            &self,
            _descriptor: &Path,
            _invocation: &Path,
            working_dir: &Path,
        ) -> Result<BTreeMap<String, PathBuf>, ExecutionError> {
            Ok(self
                .outputs
                .iter()
                .map(|(k, v)| (k.clone(), working_dir.join(v)))
                .collect())
        }
    }
}
