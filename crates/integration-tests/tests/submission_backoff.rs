//! Submission with Fibonacci backoff

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stratus_core::application::{
    BackoffConfig, BackoffOutcome, RetryScheduler, SubmissionDispatcher,
};
use stratus_core::port::submission::mocks::MockSubmissionBackend;
use stratus_core::port::SubmissionBackend;
use stratus_infra_system::SlurmBackend;

fn millis(budget: u64) -> RetryScheduler {
    RetryScheduler::new(BackoffConfig {
        budget: Duration::from_millis(budget),
        unit: Duration::from_millis(1),
    })
}

/// Scenario E: an always-failing call with a budget of 2 units gives up quickly
#[tokio::test]
async fn test_always_failing_call_is_bounded() {
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let outcome: BackoffOutcome<()> = millis(2)
        .attempt(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("scheduler unreachable") }
        })
        .await;

    assert_eq!(outcome, BackoffOutcome::Exhausted("scheduler unreachable".into()));
    assert_eq!(outcome.status(), -1);
    // Waits 1, 1, 2 units, then the budget is exceeded
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// Transient rejections are absorbed; every group is submitted once
#[tokio::test]
async fn test_dispatcher_retries_transient_rejections() {
    let backend = Arc::new(MockSubmissionBackend::new(3));
    let tasks: Vec<String> = (0..7).map(|i| format!("/prov/run/task-{i}.json")).collect();

    let report = SubmissionDispatcher::new(backend.clone(), millis(50), 3)
        .submit_all(&tasks)
        .await
        .unwrap();

    assert!(report.skipped.is_empty());
    let jobs: Vec<&str> = report.submitted.iter().map(|(_, job)| job.as_str()).collect();
    assert_eq!(jobs, ["job-1", "job-2", "job-3"]);
    assert_eq!(backend.submitted.lock().unwrap().len(), 3);
    assert_eq!(report.submitted[2].0, vec!["/prov/run/task-6.json".to_string()]);
}

/// Real Slurm backend with a stub sbatch that always refuses
#[cfg(unix)]
#[tokio::test]
async fn test_slurm_refusals_skip_groups() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let stub = tmp.path().join("sbatch");
    std::fs::write(&stub, "#!/bin/sh\necho 'QOSMaxSubmitJobPerUserLimit' >&2\nexit 1\n").unwrap();
    std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

    let backend = SlurmBackend::new(tmp.path().join("scripts"), "stratus")
        .with_sbatch(stub.display().to_string());
    assert_eq!(backend.name(), "slurm");

    let tasks = vec!["/prov/run/task-0.json".to_string(), "/prov/run/task-1.json".to_string()];
    let report = SubmissionDispatcher::new(Arc::new(backend), millis(2), 1)
        .submit_all(&tasks)
        .await
        .unwrap();

    assert!(report.submitted.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert!(report.skipped[0].1.contains("QOSMaxSubmitJobPerUserLimit"));
    assert!(tmp.path().join("scripts/group-0.sh").is_file());
    // Retries rewrite each group's script instead of adding new ones
    assert_eq!(std::fs::read_dir(tmp.path().join("scripts")).unwrap().count(), 2);
}
