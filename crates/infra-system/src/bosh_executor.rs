// Boutiques executor adapter
// Launch: bosh exec launch <descriptor> <invocation> [-v vol]... [-u]
// Outputs: bosh evaluate <descriptor> <invocation> output-files/
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use stratus_core::port::{ExecutionError, LaunchCommand, LaunchRequest, ToolExecutor};

const DEFAULT_PROGRAM: &str = "bosh";
const OUTPUT_QUERY: &str = "output-files/";

/// Executor backed by the `bosh` command-line tool
pub struct BoshExecutor {
    program: String,
}

impl BoshExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn require(path: &Path) -> Result<(), ExecutionError> {
        if path.is_file() {
            Ok(())
        } else {
            Err(ExecutionError::MissingInput(path.display().to_string()))
        }
    }
}

impl Default for BoshExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

#[async_trait]
impl ToolExecutor for BoshExecutor {
    fn launch_command(&self, request: &LaunchRequest) -> Result<LaunchCommand, ExecutionError> {
        Self::require(&request.descriptor)?;
        Self::require(&request.invocation)?;

        let mut args = vec![
            "exec".to_string(),
            "launch".to_string(),
            request.descriptor.display().to_string(),
            request.invocation.display().to_string(),
        ];
        for volume in &request.volumes {
            args.push("-v".to_string());
            args.push(volume.clone());
        }
        if request.propagate_user {
            args.push("-u".to_string());
        }

        Ok(LaunchCommand::new(self.program.clone(), args))
    }

    async fn evaluate_outputs(
        &self,
        descriptor: &Path,
        invocation: &Path,
        working_dir: &Path,
    ) -> Result<BTreeMap<String, PathBuf>, ExecutionError> {
        let output = Command::new(&self.program)
            .arg("evaluate")
            .arg(descriptor)
            .arg(invocation)
            .arg(OUTPUT_QUERY)
            .current_dir(working_dir)
            .output()
            .await
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(ExecutionError::Evaluation(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let outputs = parse_output_map(&String::from_utf8_lossy(&output.stdout), working_dir)?;
        debug!(outputs = outputs.len(), "Declared outputs evaluated");
        Ok(outputs)
    }
}

/// Parse the `{name: path}` map printed by `bosh evaluate`
fn parse_output_map(
    stdout: &str,
    working_dir: &Path,
) -> Result<BTreeMap<String, PathBuf>, ExecutionError> {
    let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(stdout.trim())
        .map_err(|e| ExecutionError::Evaluation(format!("unparseable output map: {e}")))?;

    Ok(map
        .into_iter()
        .filter_map(|(name, value)| {
            let path = PathBuf::from(value.as_str()?);
            Some((
                name,
                if path.is_absolute() {
                    path
                } else {
                    working_dir.join(path)
                },
            ))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path) -> LaunchRequest {
        let descriptor = dir.join("descriptor.json");
        let invocation = dir.join("invocation.json");
        std::fs::write(&descriptor, "{}").unwrap();
        std::fs::write(&invocation, "{}").unwrap();
        LaunchRequest {
            descriptor,
            invocation,
            volumes: vec!["/data:/data".into(), "/scratch:/tmp".into()],
            propagate_user: true,
        }
    }

    #[test]
    fn test_launch_arguments() {
        let tmp = tempfile::tempdir().unwrap();
        let req = request(tmp.path());

        let cmd = BoshExecutor::default().launch_command(&req).unwrap();

        assert_eq!(cmd.program, "bosh");
        assert_eq!(&cmd.args[..2], &["exec", "launch"]);
        assert_eq!(
            &cmd.args[4..],
            &["-v", "/data:/data", "-v", "/scratch:/tmp", "-u"]
        );
    }

    #[test]
    fn test_missing_invocation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut req = request(tmp.path());
        req.invocation = tmp.path().join("absent.json");

        let err = BoshExecutor::default().launch_command(&req).unwrap_err();
        assert!(matches!(err, ExecutionError::MissingInput(_)));
    }

    #[test]
    fn test_output_map_resolution() {
        let map = parse_output_map(
            r#"{"brain": "out/brain.nii.gz", "log": "/abs/log.txt", "flag": null}"#,
            Path::new("/work"),
        )
        .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map["brain"], PathBuf::from("/work/out/brain.nii.gz"));
        assert_eq!(map["log"], PathBuf::from("/abs/log.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_evaluate_with_stub_program() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let stub = tmp.path().join("bosh");
        std::fs::write(&stub, "#!/bin/sh\necho '{\"out\": \"result.txt\"}'\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let req = request(tmp.path());
        let outputs = BoshExecutor::new(stub.display().to_string())
            .evaluate_outputs(&req.descriptor, &req.invocation, tmp.path())
            .await
            .unwrap();

        assert_eq!(outputs["out"], tmp.path().join("result.txt"));
    }
}
