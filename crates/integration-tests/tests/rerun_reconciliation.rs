//! Rerun reconciliation over a run produced by the real executor

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stratus_core::application::{
    BuiltTaskSet, MonitorConfig, RerunReconciler, ResourceMonitor, TaskExecutor, TaskSetBuilder,
};
use stratus_core::domain::{BuildOptions, ExecutionContext, RerunMode};
use stratus_core::port::executor::mocks::MockToolExecutor;
use stratus_core::port::id_provider::RandomSuffixProvider;
use stratus_core::port::time_provider::SystemTimeProvider;
use stratus_core::transport::Transport;
use stratus_core::AppError;
use stratus_infra_system::SysinfoProcessProbe;

async fn five_task_run(root: &Path) -> BuiltTaskSet {
    let tool = root.join("tool.json");
    let invo = root.join("invocation.json");
    std::fs::write(&tool, r#"{"name": "fit"}"#).unwrap();
    std::fs::write(&invo, json!({"order": [1, 2, 3, 4, 5]}).to_string()).unwrap();

    TaskSetBuilder::new(
        Transport::local_only(),
        Arc::new(SystemTimeProvider),
        Arc::new(RandomSuffixProvider),
    )
    .build(
        tool.to_str().unwrap(),
        invo.to_str().unwrap(),
        &root.join("prov"),
        "localhost",
        &BuildOptions {
            sweep: vec!["order".into()],
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

async fn run_with_exit(root: &Path, task: &Path, code: i32) {
    let exec = TaskExecutor::new(
        Transport::local_only(),
        Arc::new(MockToolExecutor::new(format!("exit {code}"))),
        ResourceMonitor::new(
            Arc::new(SysinfoProcessProbe::new()),
            MonitorConfig {
                interval: Duration::from_millis(20),
            },
        ),
        Arc::new(SystemTimeProvider),
    );
    let ctx = ExecutionContext {
        workdir: Some(root.to_path_buf()),
        scratch_root: root.join("scratch"),
        ..Default::default()
    };
    let summary = exec.run(&task.display().to_string(), &ctx).await.unwrap();
    assert_eq!(summary.exit_code, code);
}

fn ids(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

/// Scenario D: summaries for {0,1,3} with exit codes {0,1,0}
#[tokio::test]
async fn test_modes_partition_run() {
    let tmp = tempfile::tempdir().unwrap();
    let built = five_task_run(tmp.path()).await;
    assert_eq!(built.len(), 5);

    run_with_exit(tmp.path(), &built.task_paths[0], 0).await;
    run_with_exit(tmp.path(), &built.task_paths[1], 1).await;
    run_with_exit(tmp.path(), &built.task_paths[3], 0).await;

    let prov = tmp.path().join("prov");
    let run_id = built.run_id.as_str();

    let incomplete = RerunReconciler::select(&prov, run_id, &RerunMode::Incomplete).unwrap();
    assert_eq!(ids(&incomplete), ["task-2.json", "task-4.json"]);

    let failed = RerunReconciler::select(&prov, run_id, &RerunMode::Failed).unwrap();
    assert_eq!(ids(&failed), ["task-1.json"]);

    let all = RerunReconciler::select(&prov, run_id, &RerunMode::All).unwrap();
    assert_eq!(all, built.task_paths);

    let chosen = RerunReconciler::select(&prov, run_id, &RerunMode::Select(vec![3, 9])).unwrap();
    assert_eq!(ids(&chosen), ["task-3.json"]);
}

/// A failed task rerun successfully leaves nothing to select
#[tokio::test]
async fn test_rerun_converges() {
    let tmp = tempfile::tempdir().unwrap();
    let built = five_task_run(tmp.path()).await;
    for (i, task) in built.task_paths.iter().enumerate() {
        run_with_exit(tmp.path(), task, if i == 2 { 4 } else { 0 }).await;
    }

    let prov = tmp.path().join("prov");
    let failed = RerunReconciler::select(&prov, built.run_id.as_str(), &RerunMode::Failed).unwrap();
    assert_eq!(ids(&failed), ["task-2.json"]);

    run_with_exit(tmp.path(), &failed[0], 0).await;

    let failed = RerunReconciler::select(&prov, built.run_id.as_str(), &RerunMode::Failed).unwrap();
    assert!(failed.is_empty());
    let incomplete =
        RerunReconciler::select(&prov, built.run_id.as_str(), &RerunMode::Incomplete).unwrap();
    assert!(incomplete.is_empty());
}

/// Usage errors surface before the filesystem is consulted
#[tokio::test]
async fn test_invalid_requests() {
    let tmp = tempfile::tempdir().unwrap();

    let err = RerunReconciler::select(tmp.path(), "nope", &RerunMode::Select(vec![])).unwrap_err();
    assert!(matches!(err, AppError::Usage(_)));

    let err = RerunReconciler::select(tmp.path(), "nope", &RerunMode::All).unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
