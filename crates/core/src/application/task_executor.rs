// Task execution: one Task Record run end-to-end under resource supervision
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::constants::{INVOCATION_DIR, SCRATCH_DATA_DIR};
use crate::application::lock::TaskLock;
use crate::application::monitor::ResourceMonitor;
use crate::domain::task::{
    parse_task_file_name, stderr_file_name, stdout_file_name, summary_file_name, usage_file_name,
};
use crate::domain::{DomainError, ExecutionContext, SummaryRecord, TaskId, TaskRecord, UsageSeries};
use crate::error::{AppError, Result};
use crate::port::{ExecutionError, LaunchRequest, TimeProvider, ToolExecutor};
use crate::transport::{Location, Transport};

const LAUNCH_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What the supervised process left behind
struct Finished {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    duration_secs: f64,
    usage: UsageSeries,
}

/// Files of one attempt, resolved locally
struct Staged {
    id: TaskId,
    record: TaskRecord,
    descriptor: PathBuf,
    invocation: PathBuf,
    working_dir: PathBuf,
}

/// Runs one Task Record and persists exactly one Summary Record per attempt.
///
/// A tool exiting nonzero is recorded, not raised. Failing to launch the
/// tool at all is an error and leaves the task incomplete.
pub struct TaskExecutor {
    transport: Transport,
    executor: Arc<dyn ToolExecutor>,
    monitor: ResourceMonitor,
    time_provider: Arc<dyn TimeProvider>,
}

impl TaskExecutor {
    pub fn new(
        transport: Transport,
        executor: Arc<dyn ToolExecutor>,
        monitor: ResourceMonitor,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            transport,
            executor,
            monitor,
            time_provider,
        }
    }

    /// Execute the Task Record at `task_uri` (`<run>/task-<id>.json`)
    ///
    /// # Errors
    /// - AppError::Conflict if the same id is already running on this host
    /// - AppError::Transport if the record, descriptor, invocation or data cannot be fetched
    /// - AppError::Execution if the tool cannot be launched
    pub async fn run(&self, task_uri: &str, ctx: &ExecutionContext) -> Result<SummaryRecord> {
        ctx.validate()?;

        let task_loc = Location::parse(task_uri)?;
        let file_name = task_loc
            .file_name()
            .ok_or_else(|| DomainError::InvalidTaskFileName(task_uri.to_string()))?;
        let id = parse_task_file_name(&file_name)
            .ok_or_else(|| DomainError::InvalidTaskFileName(file_name.clone()))?;
        let run_loc = task_loc
            .parent()
            .ok_or_else(|| AppError::NotFound(format!("run directory of {task_uri}")))?;
        let run_name = run_loc.file_name().unwrap_or_else(|| "run".to_string());

        let run_scratch = ctx.scratch_root.join(&run_name);
        let _lock = TaskLock::acquire(&run_scratch, id, self.monitor.tree_probe().as_ref()).await?;

        let scratch = run_scratch.join(format!("task-{id}"));
        self.transport.remove(&scratch).await?;
        std::fs::create_dir_all(&scratch)?;

        let result = self
            .attempt(id, &task_loc, &file_name, &run_loc, &scratch, ctx)
            .await;

        if let Err(e) = self.transport.remove(&scratch).await {
            warn!(task_id = id, scratch = %scratch.display(), error = %e, "Scratch cleanup failed");
        }
        if let Err(e) = &result {
            warn!(task_id = id, run = %run_name, error = %e, "Task attempt aborted before completion");
        }
        result
    }

    async fn attempt(
        &self,
        id: TaskId,
        task_loc: &Location,
        file_name: &str,
        run_loc: &Location,
        scratch: &Path,
        ctx: &ExecutionContext,
    ) -> Result<SummaryRecord> {
        let staged = self.stage(id, task_loc, file_name, scratch, ctx).await?;
        let launch_time = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(
            self.time_provider.now_millis(),
        )
        .map(|t| t.format(LAUNCH_TIME_FORMAT).to_string())
        .unwrap_or_default();

        let finished = self.launch(&staged, ctx).await?;
        let exit_code = exit_code(&finished.status);
        info!(
            task_id = id,
            exit_code,
            duration_secs = finished.duration_secs,
            samples = finished.usage.len(),
            "Tool finished"
        );

        let mut outputs = self.existing_outputs(&staged).await;

        let usage_ref = self
            .persist(scratch, &usage_file_name(id), finished.usage.to_csv().as_bytes(), run_loc)
            .await?;
        let stdout_ref = self
            .persist(scratch, &stdout_file_name(id), &finished.stdout, run_loc)
            .await?;
        let stderr_ref = self
            .persist(scratch, &stderr_file_name(id), &finished.stderr, run_loc)
            .await?;

        let mut output_refs: Vec<String> =
            outputs.iter().map(|p| p.display().to_string()).collect();
        if !ctx.local {
            let dest = Location::parse(&staged.record.output_location)?;
            output_refs.clear();
            for output in &outputs {
                for uploaded in self.transport.put(output, &dest).await? {
                    output_refs.push(uploaded.to_string());
                }
            }
            info!(task_id = id, dest = %dest, outputs = output_refs.len(), "Outputs uploaded");
        }

        let summary = SummaryRecord {
            id,
            duration_secs: finished.duration_secs,
            launch_time,
            exit_code,
            outputs: output_refs,
            usage: usage_ref,
            stdout: stdout_ref,
            stderr: stderr_ref,
        };
        self.persist(scratch, &summary_file_name(id), &summary.to_json()?, run_loc)
            .await?;
        info!(task_id = id, exit_code, run = %run_loc, "Summary record written");

        if !ctx.local {
            for output in outputs.drain(..) {
                self.transport.remove(&output).await?;
            }
        }
        Ok(summary)
    }

    /// Fetch the record, descriptor, invocation and (when remote) input data
    async fn stage(
        &self,
        id: TaskId,
        task_loc: &Location,
        file_name: &str,
        scratch: &Path,
        ctx: &ExecutionContext,
    ) -> Result<Staged> {
        let record_path = first(self.transport.get(task_loc, scratch).await?, task_loc)?;
        let record = TaskRecord::parse(file_name, &std::fs::read(&record_path)?)?;

        let tool_loc = Location::parse(&record.tool)?;
        let descriptor = first(self.transport.get(&tool_loc, scratch).await?, &tool_loc)?;
        let invo_loc = Location::parse(&record.invocation)?;
        // Own directory, so an invocation named like the descriptor or the record survives
        let invocation = first(
            self.transport.get(&invo_loc, &scratch.join(INVOCATION_DIR)).await?,
            &invo_loc,
        )?;

        let data: Vec<Location> = record
            .data_locations
            .iter()
            .map(|d| Location::parse(d))
            .collect::<std::result::Result<_, _>>()?;

        let working_dir = if !ctx.local && data.iter().any(Location::is_remote) {
            let data_dir = scratch.join(SCRATCH_DATA_DIR);
            for loc in &data {
                let fetched = self.transport.get(loc, &data_dir).await?;
                debug!(task_id = id, src = %loc, files = fetched.len(), "Input data fetched");
            }
            data_dir
        } else {
            match &ctx.workdir {
                Some(dir) if dir.is_dir() => dir.clone(),
                Some(dir) => {
                    warn!(task_id = id, workdir = %dir.display(), "Workdir missing, using current directory");
                    std::env::current_dir()?
                }
                None => std::env::current_dir()?,
            }
        };

        Ok(Staged {
            id,
            record,
            descriptor,
            invocation,
            working_dir,
        })
    }

    /// Spawn the tool and sample it until it exits
    async fn launch(&self, staged: &Staged, ctx: &ExecutionContext) -> Result<Finished> {
        let command = self.executor.launch_command(&LaunchRequest {
            descriptor: staged.descriptor.clone(),
            invocation: staged.invocation.clone(),
            volumes: ctx.volumes.clone(),
            propagate_user: ctx.propagate_user,
        })?;

        let started = Instant::now();
        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&staged.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {e}", command.program)))?;

        let pid = child.id();
        info!(
            task_id = staged.id,
            pid = pid.unwrap_or_default(),
            program = %command.program,
            workdir = %staged.working_dir.display(),
            "Tool launched"
        );

        // Rendezvous: the waiter owns the child and signals exit; output is
        // only read back after the monitor has observed it.
        let (exited_tx, exited_rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            let output = child.wait_with_output().await;
            let elapsed = started.elapsed().as_secs_f64();
            let _ = exited_tx.send(true);
            (output, elapsed)
        });

        let usage: UsageSeries = match pid {
            Some(pid) => self
                .monitor
                .sample(pid, started, exited_rx)
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .collect(),
            None => UsageSeries::new(),
        };

        let (output, duration_secs) = waiter
            .await
            .map_err(|e| AppError::Internal(format!("process waiter failed: {e}")))?;
        let output = output.map_err(|e| ExecutionError::IoError(e.to_string()))?;

        Ok(Finished {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_secs,
            usage,
        })
    }

    /// Declared outputs that exist on disk; evaluation failure yields none
    async fn existing_outputs(&self, staged: &Staged) -> Vec<PathBuf> {
        match self
            .executor
            .evaluate_outputs(&staged.descriptor, &staged.invocation, &staged.working_dir)
            .await
        {
            Ok(declared) => declared
                .into_iter()
                .filter_map(|(name, path)| {
                    if path.exists() {
                        Some(path)
                    } else {
                        debug!(task_id = staged.id, output = %name, path = %path.display(), "Declared output missing");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                warn!(task_id = staged.id, error = %e, "Output evaluation failed, recording no outputs");
                Vec::new()
            }
        }
    }

    /// Write `bytes` into scratch, then copy into the run directory
    async fn persist(
        &self,
        scratch: &Path,
        name: &str,
        bytes: &[u8],
        run_loc: &Location,
    ) -> Result<String> {
        let local = scratch.join(name);
        atomic_write(&local, bytes)?;
        let stored = first(self.transport.put(&local, run_loc).await?, run_loc)?;
        Ok(stored.to_string())
    }
}

fn first<T>(items: Vec<T>, loc: &Location) -> Result<T> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(loc.to_string()))
}

#[cfg(unix)]
fn exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
