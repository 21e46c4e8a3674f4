// Slurm submission backend
// One batch script per group, submitted with sbatch
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use stratus_core::domain::task::parse_task_file_name;
use stratus_core::domain::TaskId;
use stratus_core::port::{SubmissionBackend, SubmissionError};

static SUBMITTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Submitted batch job (\d+)").unwrap());

/// Submits groups of Task Records to Slurm
pub struct SlurmBackend {
    /// Where `group-<first id>.sh` scripts are written (normally the run directory)
    script_dir: PathBuf,
    /// Program each script invokes as `<driver> task <record> ...`
    driver: String,
    /// Extra flags for the `task` subcommand
    task_args: Vec<String>,
    /// Extra `#SBATCH` directives, without the prefix
    directives: Vec<String>,
    sbatch: String,
}

impl SlurmBackend {
    pub fn new(script_dir: impl Into<PathBuf>, driver: impl Into<String>) -> Self {
        Self {
            script_dir: script_dir.into(),
            driver: driver.into(),
            task_args: Vec::new(),
            directives: Vec::new(),
            sbatch: "sbatch".to_string(),
        }
    }

    pub fn with_task_args(mut self, args: Vec<String>) -> Self {
        self.task_args = args;
        self
    }

    pub fn with_directives(mut self, directives: Vec<String>) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_sbatch(mut self, program: impl Into<String>) -> Self {
        self.sbatch = program.into();
        self
    }

    fn render_script(&self, group_no: TaskId, group: &[String]) -> String {
        let mut script = String::from("#!/bin/bash\n");
        script.push_str(&format!("#SBATCH --job-name=stratus-group-{group_no}\n"));
        for directive in &self.directives {
            script.push_str(&format!("#SBATCH {directive}\n"));
        }
        script.push('\n');
        for record in group {
            let mut line = vec![shell_quote(&self.driver), "task".to_string(), shell_quote(record)];
            line.extend(self.task_args.iter().map(|a| shell_quote(a)));
            script.push_str(&line.join(" "));
            script.push('\n');
        }
        script
    }
}

/// Groups are named by their first Task Record's id, so a resubmitted group
/// rewrites its own script
fn group_number(group: &[String]) -> Result<TaskId, SubmissionError> {
    group
        .first()
        .and_then(|record| Path::new(record).file_name())
        .and_then(|name| parse_task_file_name(&name.to_string_lossy()))
        .ok_or_else(|| {
            SubmissionError::Rejected(format!("group does not start with a task record: {group:?}"))
        })
}

fn shell_quote(raw: &str) -> String {
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:=+@,".contains(c))
    {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

#[async_trait]
impl SubmissionBackend for SlurmBackend {
    fn name(&self) -> &str {
        "slurm"
    }

    async fn setup(&self) -> Result<(), SubmissionError> {
        tokio::fs::create_dir_all(&self.script_dir)
            .await
            .map_err(|e| SubmissionError::Setup(format!("{}: {e}", self.script_dir.display())))?;
        Ok(())
    }

    async fn submit(&self, group: &[String]) -> Result<String, SubmissionError> {
        let group_no = group_number(group)?;
        let script_path = self.script_dir.join(format!("group-{group_no}.sh"));
        tokio::fs::write(&script_path, self.render_script(group_no, group))
            .await
            .map_err(|e| SubmissionError::Io(format!("{}: {e}", script_path.display())))?;
        debug!(script = %script_path.display(), records = group.len(), "Batch script written");

        let output = Command::new(&self.sbatch)
            .arg(&script_path)
            .output()
            .await
            .map_err(|e| SubmissionError::Io(format!("{}: {e}", self.sbatch)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(SubmissionError::Rejected(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let job_id = SUBMITTED
            .captures(&stdout)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| SubmissionError::Rejected(format!("unexpected sbatch output: {}", stdout.trim())))?;
        info!(job_id = %job_id, script = %script_path.display(), "Slurm job submitted");
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_lists_every_record() {
        let backend = SlurmBackend::new("/runs/r1", "/opt/bin/stratus")
            .with_task_args(vec!["--scratch".into(), "/tmp/my scratch".into()])
            .with_directives(vec!["--time=01:00:00".into()]);

        let script = backend.render_script(
            3,
            &["/runs/r1/task-0.json".to_string(), "/runs/r1/task-1.json".to_string()],
        );

        assert!(script.starts_with("#!/bin/bash\n#SBATCH --job-name=stratus-group-3\n"));
        assert!(script.contains("#SBATCH --time=01:00:00\n"));
        assert!(script.contains(
            "/opt/bin/stratus task /runs/r1/task-1.json --scratch '/tmp/my scratch'\n"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_submit_parses_job_id() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let stub = tmp.path().join("sbatch");
        std::fs::write(&stub, "#!/bin/sh\necho \"Submitted batch job 4242\"\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = SlurmBackend::new(tmp.path().join("scripts"), "stratus")
            .with_sbatch(stub.display().to_string());
        backend.setup().await.unwrap();

        let job = backend.submit(&["/r/task-0.json".to_string()]).await.unwrap();
        assert_eq!(job, "4242");
        assert!(tmp.path().join("scripts/group-0.sh").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejection_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let stub = tmp.path().join("sbatch");
        std::fs::write(&stub, "#!/bin/sh\necho 'invalid partition' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = SlurmBackend::new(tmp.path(), "stratus").with_sbatch(stub.display().to_string());
        let err = backend.submit(&["/r/task-0.json".to_string()]).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected(msg) if msg.contains("invalid partition")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resubmission_rewrites_the_same_script() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let stub = tmp.path().join("sbatch");
        std::fs::write(&stub, "#!/bin/sh\necho \"Submitted batch job 7\"\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = SlurmBackend::new(tmp.path().join("scripts"), "stratus")
            .with_sbatch(stub.display().to_string());
        backend.setup().await.unwrap();

        let group = ["/r/task-4.json".to_string(), "/r/task-5.json".to_string()];
        for _ in 0..3 {
            backend.submit(&group).await.unwrap();
        }

        let scripts: Vec<_> = std::fs::read_dir(tmp.path().join("scripts"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(scripts, vec!["group-4.sh".to_string()]);
    }

    #[test]
    fn test_group_must_start_with_a_task_record() {
        assert_eq!(group_number(&["/r/task-12.json".to_string()]).unwrap(), 12);
        assert!(group_number(&[]).is_err());
        assert!(group_number(&["/r/notes.txt".to_string()]).is_err());
    }
}
