//! Stratus - build, execute, resubmit and report task sets
//! Composition root: wires core services to system and storage adapters

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use stratus_core::application::constants::{
    DEFAULT_BACKOFF_BUDGET, DEFAULT_GROUP_SIZE, DEFAULT_SCRATCH_ROOT, REPORT_FILE_NAME,
};
use stratus_core::application::{
    BackoffConfig, DispatchConfig, LocalDispatcher, MonitorConfig, RerunReconciler,
    ResourceMonitor, RetryScheduler, RunReport, SubmissionDispatcher, TaskExecutor,
    TaskSetBuilder,
};
use stratus_core::domain::{BuildOptions, ExecutionContext, RerunMode, TaskId};
use stratus_core::port::id_provider::RandomSuffixProvider;
use stratus_core::port::time_provider::SystemTimeProvider;
use stratus_core::transport::{Location, Transport};
use stratus_infra_storage::DirectoryObjectStore;
use stratus_infra_system::{BoshExecutor, ContainerStatsProbe, SlurmBackend, SysinfoProcessProbe};

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Task lifecycle engine for descriptor-driven tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log format: json or pretty
    #[arg(long, global = true, env = "STRATUS_LOG_FORMAT", default_value = "pretty")]
    log_format: String,

    /// Also write daily-rolling log files into this directory
    #[arg(long, global = true, env = "STRATUS_LOG_DIR")]
    log_dir: Option<String>,

    /// Root for per-task scratch directories and lock files
    #[arg(long, global = true, env = "STRATUS_SCRATCH", default_value = DEFAULT_SCRATCH_ROOT)]
    scratch: String,

    /// Directory backing `s3://bucket/key` locations (bucket = subdirectory);
    /// without it, builds with the `s3` feature talk to Amazon S3
    #[arg(long, global = true, env = "STRATUS_OBJECT_STORE_ROOT")]
    object_store_root: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or reconcile) a run and execute it on this host
    Local(LocalArgs),

    /// Execute a single Task Record
    Task(TaskArgs),

    /// Build (or reconcile) a run and submit it to a cluster
    Submit {
        #[command(subcommand)]
        backend: SubmitBackend,
    },

    /// Consolidate a run directory into a JSON report
    Report {
        /// Run directory
        run_dir: String,

        /// Output file (default: ./stratus-summary.json)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
enum SubmitBackend {
    /// Submit groups of Task Records with sbatch
    Slurm(SlurmArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Tool descriptor (path or s3:// URI)
    tool: String,

    /// Invocation file or directory of invocations
    invocation: String,

    /// Provenance root; each run gets a directory below it
    prov_root: String,

    /// Input data location
    #[arg(short = 'd', long, default_value = "localhost")]
    dataloc: String,

    /// Fan out over BIDS participants/sessions
    #[arg(short = 'b', long)]
    bids: bool,

    /// Parameter to sweep (repeatable)
    #[arg(long)]
    sweep: Vec<String>,

    /// Where outputs land (default: the run directory)
    #[arg(long)]
    output_location: Option<String>,

    /// Re-execute part of an existing run: all, failed, incomplete or select
    #[arg(long, requires = "run_id")]
    rerun: Option<String>,

    /// Run to reconcile
    #[arg(long)]
    run_id: Option<String>,

    /// Task ids for `--rerun select`
    #[arg(long, num_args = 1..)]
    ids: Vec<TaskId>,
}

#[derive(Args)]
struct ExecArgs {
    /// Volume mount host:container (repeatable)
    #[arg(short = 'v', long = "volume")]
    volumes: Vec<String>,

    /// Run the tool's container as the calling user
    #[arg(short = 'u', long)]
    user: bool,

    /// Working directory when input data is not staged
    #[arg(short = 'w', long)]
    workdir: Option<String>,

    /// Boutiques executable
    #[arg(long, env = "STRATUS_BOSH", default_value = "bosh")]
    bosh: String,
}

#[derive(Args)]
struct LocalArgs {
    #[command(flatten)]
    build: BuildArgs,

    #[command(flatten)]
    exec: ExecArgs,

    /// Task Records executing at once
    #[arg(short = 'p', long, default_value_t = 1)]
    parallel: usize,
}

#[derive(Args)]
struct TaskArgs {
    /// Task Record URI (`.../task-<id>.json`)
    task: String,

    /// Local execution: no data staging, output upload or purge
    #[arg(long)]
    local: bool,

    #[command(flatten)]
    exec: ExecArgs,
}

#[derive(Args)]
struct SlurmArgs {
    #[command(flatten)]
    build: BuildArgs,

    #[command(flatten)]
    exec: ExecArgs,

    /// Task Records per job
    #[arg(short = 'g', long, default_value_t = DEFAULT_GROUP_SIZE)]
    group_size: usize,

    /// Give up on a group after this many seconds of backoff
    #[arg(long, env = "STRATUS_BACKOFF_SECS", default_value_t = DEFAULT_BACKOFF_BUDGET.as_secs())]
    backoff_secs: u64,

    /// Extra #SBATCH directive (repeatable), e.g. --sbatch-opt=--time=01:00:00
    #[arg(long = "sbatch-opt", allow_hyphen_values = true)]
    sbatch_opts: Vec<String>,

    /// Upload the run to this s3:// root before submitting; tasks then run remote-style
    #[arg(long)]
    remote_root: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_format, cli.log_dir.as_deref())?;

    info!(version = stratus_core::VERSION, "Stratus starting");

    let transport = build_transport(cli.object_store_root.as_deref()).await;
    let scratch_root = expand(&cli.scratch);
    let object_store_root = cli.object_store_root.clone();

    match cli.command {
        Commands::Local(args) => run_local(args, transport, scratch_root).await,
        Commands::Task(args) => run_task(args, transport, scratch_root).await,
        Commands::Submit {
            backend: SubmitBackend::Slurm(args),
        } => submit_slurm(args, object_store_root, transport, scratch_root).await,
        Commands::Report { run_dir, output } => report(&run_dir, output.as_deref()),
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// A directory root wins; otherwise S3 when built with it, else local paths only
async fn build_transport(object_store_root: Option<&str>) -> Transport {
    match object_store_root {
        Some(root) => Transport::new(Arc::new(DirectoryObjectStore::new(expand(root)))),
        #[cfg(feature = "s3")]
        None => Transport::new(Arc::new(stratus_infra_storage::S3ObjectStore::from_env().await)),
        #[cfg(not(feature = "s3"))]
        None => Transport::local_only(),
    }
}

fn build_executor(transport: Transport, bosh: &str) -> TaskExecutor {
    let monitor = ResourceMonitor::new(Arc::new(SysinfoProcessProbe::new()), MonitorConfig::default())
        .with_child_probe(Arc::new(ContainerStatsProbe::default()));
    TaskExecutor::new(
        transport,
        Arc::new(BoshExecutor::new(bosh)),
        monitor,
        Arc::new(SystemTimeProvider),
    )
}

fn execution_context(exec: &ExecArgs, local: bool, scratch_root: PathBuf) -> ExecutionContext {
    ExecutionContext {
        local,
        workdir: exec.workdir.as_deref().map(expand),
        volumes: exec.volumes.clone(),
        propagate_user: exec.user,
        scratch_root,
    }
}

/// Task Record paths to dispatch: a fresh build, or a subset of a prior run
async fn resolve_tasks(
    build: &BuildArgs,
    transport: &Transport,
) -> Result<(Vec<PathBuf>, Option<stratus_core::application::BuiltTaskSet>)> {
    let prov_root = expand(&build.prov_root);

    if let Some(mode) = &build.rerun {
        let Some(run_id) = &build.run_id else {
            bail!("--rerun requires --run-id");
        };
        let mode = RerunMode::from_parts(mode, &build.ids)?;
        let tasks = RerunReconciler::select(&prov_root, run_id, &mode)
            .with_context(|| format!("reconciling run {run_id}"))?;
        return Ok((tasks, None));
    }

    let options = BuildOptions {
        bids: build.bids,
        sweep: build.sweep.clone(),
        output_location: build.output_location.clone(),
    };
    let builder = TaskSetBuilder::new(
        transport.clone(),
        Arc::new(SystemTimeProvider),
        Arc::new(RandomSuffixProvider),
    );
    let built = builder
        .build(&build.tool, &build.invocation, &prov_root, &build.dataloc, &options)
        .await
        .context("building task set")?;
    println!("{}", built.run_dir.display());
    Ok((built.task_paths.clone(), Some(built)))
}

async fn run_local(args: LocalArgs, transport: Transport, scratch_root: PathBuf) -> Result<()> {
    let config = DispatchConfig {
        parallelism: args.parallel,
        ..Default::default()
    };
    config.validate()?;

    let ctx = execution_context(&args.exec, true, scratch_root);
    ctx.validate()?;

    let (tasks, _) = resolve_tasks(&args.build, &transport).await?;
    let tasks: Vec<String> = tasks.iter().map(|p| p.display().to_string()).collect();
    if tasks.is_empty() {
        warn!("No task records selected");
        return Ok(());
    }

    let executor = Arc::new(build_executor(transport, &args.exec.bosh));
    let outcomes = LocalDispatcher::new(executor, config.parallelism)
        .run_all(&tasks, &ctx)
        .await;

    for outcome in &outcomes {
        match &outcome.result {
            Ok(summary) => println!("{}\texit={}", outcome.task, summary.exit_code),
            Err(e) => println!("{}\terror={e}", outcome.task),
        }
    }
    let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
    info!(tasks = outcomes.len(), succeeded, "Local run finished");
    Ok(())
}

async fn run_task(args: TaskArgs, transport: Transport, scratch_root: PathBuf) -> Result<()> {
    let ctx = execution_context(&args.exec, args.local, scratch_root);
    let summary = build_executor(transport, &args.exec.bosh)
        .run(&args.task, &ctx)
        .await
        .with_context(|| format!("executing {}", args.task))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn submit_slurm(
    args: SlurmArgs,
    object_store_root: Option<String>,
    transport: Transport,
    scratch_root: PathBuf,
) -> Result<()> {
    let config = DispatchConfig {
        group_size: args.group_size,
        ..Default::default()
    };
    config.validate()?;

    let (task_paths, built) = resolve_tasks(&args.build, &transport).await?;
    if task_paths.is_empty() {
        warn!("No task records selected");
        return Ok(());
    }
    let script_dir = task_paths[0]
        .parent()
        .map(PathBuf::from)
        .context("task record without run directory")?;

    let tasks: Vec<String> = match (&args.remote_root, &built) {
        (Some(root), Some(built)) => {
            let root = Location::parse(root)?;
            TaskSetBuilder::new(
                transport.clone(),
                Arc::new(SystemTimeProvider),
                Arc::new(RandomSuffixProvider),
            )
            .stage_remote(built, &root)
            .await
            .context("staging run to remote storage")?
            .into_iter()
            .map(|loc| loc.to_string())
            .collect()
        }
        (Some(_), None) => bail!("--remote-root applies to new runs only"),
        (None, _) => task_paths.iter().map(|p| p.display().to_string()).collect(),
    };

    let driver = std::env::current_exe()
        .context("locating the stratus executable")?
        .display()
        .to_string();
    let backend = SlurmBackend::new(script_dir, driver)
        .with_task_args(task_args(&args, object_store_root.as_deref(), &scratch_root))
        .with_directives(args.sbatch_opts.clone());

    let scheduler = RetryScheduler::new(BackoffConfig::with_budget(Duration::from_secs(
        args.backoff_secs,
    )));
    let report = SubmissionDispatcher::new(Arc::new(backend), scheduler, config.group_size)
        .submit_all(&tasks)
        .await?;

    for (group, job_id) in &report.submitted {
        println!("{job_id}\t{}", group.join(","));
    }
    for (group, error) in &report.skipped {
        println!("skipped\t{}\t{error}", group.join(","));
    }
    Ok(())
}

/// Flags each batch job passes to `stratus task`
fn task_args(
    args: &SlurmArgs,
    object_store_root: Option<&str>,
    scratch_root: &Path,
) -> Vec<String> {
    let mut flags = vec!["--scratch".to_string(), scratch_root.display().to_string()];
    if args.remote_root.is_none() {
        flags.push("--local".to_string());
    }
    if let Some(root) = object_store_root {
        flags.push("--object-store-root".to_string());
        flags.push(expand(root).display().to_string());
    }
    for volume in &args.exec.volumes {
        flags.push("--volume".to_string());
        flags.push(volume.clone());
    }
    if args.exec.user {
        flags.push("--user".to_string());
    }
    if let Some(workdir) = &args.exec.workdir {
        flags.push("--workdir".to_string());
        flags.push(expand(workdir).display().to_string());
    }
    flags.push("--bosh".to_string());
    flags.push(args.exec.bosh.clone());
    flags
}

fn report(run_dir: &str, output: Option<&str>) -> Result<()> {
    let run_dir = expand(run_dir);
    let output = match output {
        Some(path) => expand(path),
        None => std::env::current_dir()?.join(REPORT_FILE_NAME),
    };

    let report = RunReport::collect(&run_dir)
        .with_context(|| format!("reading run {}", run_dir.display()))?;
    report.write_json(&output)?;
    println!("{}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_rerun_parses_ids() {
        let cli = Cli::try_parse_from([
            "stratus", "local", "tool.json", "invo.json", "/prov", "--rerun", "select",
            "--run-id", "2026-01-01_10-00-00_ABCDEFGH", "--ids", "1", "4",
        ])
        .unwrap();

        let Commands::Local(args) = cli.command else {
            panic!("expected local");
        };
        assert_eq!(args.build.ids, vec![1, 4]);
        assert_eq!(args.parallel, 1);
    }

    #[test]
    fn test_rerun_requires_run_id() {
        assert!(Cli::try_parse_from([
            "stratus", "local", "tool.json", "invo.json", "/prov", "--rerun", "failed",
        ])
        .is_err());
    }

    #[test]
    fn test_batch_jobs_inherit_exec_flags() {
        let cli = Cli::try_parse_from([
            "stratus", "submit", "slurm", "tool.json", "invo.json", "/prov", "-v", "/d:/d", "-u",
        ])
        .unwrap();
        let Commands::Submit { backend: SubmitBackend::Slurm(args) } = cli.command else {
            panic!("expected submit slurm");
        };

        let flags = task_args(&args, Some("/stores"), Path::new("/scratch"));
        assert_eq!(
            flags,
            [
                "--scratch", "/scratch", "--local", "--object-store-root", "/stores",
                "--volume", "/d:/d", "--user", "--bosh", "bosh",
            ]
        );
    }
}
